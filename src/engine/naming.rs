use sanitize_filename::{sanitize_with_options, Options};
use std::path::{Path, PathBuf};

/// Longest destination path (in bytes) written before falling back to an
/// index-based name.
pub const MAX_PATH_LEN: usize = 250;

/// Longest single file name most file systems accept, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Appended to the destination while the body is still streaming.
pub const PARTIAL_SUFFIX: &str = ".part";

// Windows rules on every platform. Length is left to `fit_path_length`, which
// keeps the extension.
fn options() -> Options<'static> {
    Options { windows: true, truncate: false, replacement: "" }
}

/// Strips characters that are illegal on Windows or Unix file systems.
///
/// Repeated until nothing changes, so `sanitize(sanitize(x)) == sanitize(x)`.
/// An empty result becomes `_`.
pub fn sanitize(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = sanitize_with_options(&current, options());
        if next == current {
            break;
        }
        current = next;
    }

    if current.is_empty() {
        "_".to_string()
    } else {
        current
    }
}

/// Returns `path` if nothing exists there, otherwise the lowest free
/// `stem(N).ext` variant next to it.
pub fn ensure_unique(path: &Path) -> PathBuf {
    ensure_unique_with(path, |p| p.exists())
}

/// Same as [`ensure_unique`] but with a caller-supplied notion of "taken".
pub fn ensure_unique_with(path: &Path, is_taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !is_taken(path) {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut n: u32 = 1;
    loop {
        let name = match &ext {
            Some(ext) => format!("{}({}).{}", stem, n, ext),
            None => format!("{}({})", stem, n),
        };
        let candidate = path.with_file_name(name);
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Keeps `name` unless `save_dir/name` is longer than [`MAX_PATH_LEN`] bytes
/// or `name` plus [`PARTIAL_SUFFIX`] would exceed [`MAX_NAME_LEN`], in which
/// case the image index plus the original extension is used instead.
pub fn fit_path_length(save_dir: &Path, name: &str, index: u32) -> String {
    let full = save_dir.join(name);
    if full.as_os_str().len() <= MAX_PATH_LEN && name.len() + PARTIAL_SUFFIX.len() <= MAX_NAME_LEN {
        return name.to_string();
    }

    match extension_of(name) {
        Some(ext) => format!("{}{}", index, ext),
        None => index.to_string(),
    }
}

/// `{title}_{index}{ext}`, with the title sanitized and spaces turned into
/// underscores. Forum attachment links carry no extension and default to
/// `.jpg`.
pub fn title_based_name(post_title: &str, image_url: &str, index: u32) -> String {
    let title = sanitize(post_title).replace(' ', "_");

    let ext = if image_url.contains("attachment.php") {
        ".jpg".to_string()
    } else {
        let path = image_url.split(['?', '#']).next().unwrap_or(image_url);
        let last = path.rsplit('/').next().unwrap_or(path);
        extension_of(last).unwrap_or_default()
    };

    format!("{}_{}{}", title, index, ext)
}

/// Extension including the leading dot, if the name has one.
fn extension_of(name: &str) -> Option<String> {
    match name.rfind('.') {
        Some(i) if i + 1 < name.len() => Some(name[i..].to_string()),
        _ => None,
    }
}
