use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Refuses to write the new appcast over the one it was built from.
///
/// The caller promotes the output in a separate step; writing in place would
/// lose the prior appcast if that step is never reached.
pub fn ensure_distinct(input: &Path, output: &Path) -> Result<()> {
    let input_resolved = input
        .canonicalize()
        .with_context(|| format!("Failed to resolve input path '{}'", input.display()))?;

    // The output usually does not exist yet; resolve its directory instead.
    let output_resolved = match output.canonicalize() {
        Ok(path) => path,
        Err(_) => {
            let parent = match output.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            let file_name = output
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Output path '{}' has no file name", output.display()))?;
            parent
                .canonicalize()
                .with_context(|| {
                    format!("Output directory '{}' does not exist", parent.display())
                })?
                .join(file_name)
        }
    };

    if input_resolved == output_resolved {
        anyhow::bail!(
            "Output '{}' is the same file as the input appcast; choose a different path",
            output.display()
        );
    }
    Ok(())
}

/// A not-yet-published sibling of the destination. Removed on drop unless
/// [`Staged::publish`] moved it into place.
struct Staged {
    path: PathBuf,
    published: bool,
}

impl Staged {
    fn create(target: &Path) -> Result<(Self, File)> {
        static SEQUENCE: AtomicU32 = AtomicU32::new(0);

        let name = target
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Output path '{}' has no file name", target.display()))?;
        let mut staged_name = std::ffi::OsString::from(".");
        staged_name.push(name);
        staged_name.push(format!(
            ".{}-{}.partial",
            std::process::id(),
            SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));
        let path = target.with_file_name(staged_name);

        // create_new: never follow or reuse something already at that name.
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Cannot stage output next to '{}'", target.display()))?;
        Ok((
            Self {
                path,
                published: false,
            },
            file,
        ))
    }

    fn publish(mut self, target: &Path) -> Result<()> {
        std::fs::rename(&self.path, target)
            .with_context(|| format!("Cannot move staged output onto '{}'", target.display()))?;
        self.published = true;
        Ok(())
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.published {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Replaces `path` with `content` so readers see either the old file or the
/// whole new one, never a prefix.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let (staged, mut file) = Staged::create(path)?;
    file.write_all(content)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("Writing {} bytes for '{}' failed", content.len(), path.display()))?;
    drop(file);
    staged.publish(path)?;

    tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote appcast");
    Ok(())
}
