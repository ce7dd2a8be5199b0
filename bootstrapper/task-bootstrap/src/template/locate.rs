use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::Path;

use super::TemplateError;

/// Reads the template at `relative` under `sandbox`.
///
/// A nonzero `max_bytes` refuses larger files before their content is read;
/// the read itself is capped too, so a file that grows after the size check
/// is still refused. Zero means no limit.
pub fn locate_template(
    sandbox: &Path,
    relative: &str,
    max_bytes: u64,
    source: &str,
) -> Result<String, TemplateError> {
    let path = sandbox.join(relative);

    let meta = match fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(TemplateError::NotFound {
                source_name: source.to_string(),
                path,
            })
        }
        Err(e) => {
            return Err(TemplateError::Read {
                source_name: source.to_string(),
                path,
                source: e,
            })
        }
    };

    if !meta.is_file() {
        return Err(TemplateError::NotRegularFile {
            source_name: source.to_string(),
            path,
        });
    }

    if max_bytes != 0 && meta.len() > max_bytes {
        return Err(TemplateError::TooLarge {
            source_name: source.to_string(),
            path,
            size: meta.len(),
            max_bytes,
        });
    }

    let read_err = |e: std::io::Error, path: &Path| TemplateError::Read {
        source_name: source.to_string(),
        path: path.to_path_buf(),
        source: e,
    };

    let file = File::open(&path).map_err(|e| read_err(e, &path))?;
    let limit = if max_bytes == 0 {
        u64::MAX
    } else {
        max_bytes.saturating_add(1)
    };
    let mut data = Vec::with_capacity(meta.len() as usize);
    file.take(limit)
        .read_to_end(&mut data)
        .map_err(|e| read_err(e, &path))?;
    if max_bytes != 0 && data.len() as u64 > max_bytes {
        return Err(TemplateError::TooLarge {
            source_name: source.to_string(),
            path,
            size: data.len() as u64,
            max_bytes,
        });
    }

    String::from_utf8(data).map_err(|_| TemplateError::NotUtf8 {
        source_name: source.to_string(),
        path,
    })
}
