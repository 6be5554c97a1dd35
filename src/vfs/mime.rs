/// MIME type reported for directories
pub const DIRECTORY_MIME: &str = "inode/directory";

/// Fallback for files with an unknown or missing extension
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Container MIME types the cache agrees to open
pub const SUPPORTED_CONTAINER_MIMES: &[&str] = &[
    "application/zip",
    "application/x-zip",
    "application/x-zip-compressed",
    "application/java-archive",
    "application/vnd.android.package-archive",
    "application/epub+zip",
];

pub fn is_supported_container(mime_type: &str) -> bool {
    SUPPORTED_CONTAINER_MIMES
        .iter()
        .any(|supported| supported.eq_ignore_ascii_case(mime_type))
}

pub fn is_image(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// Guess a MIME type from the extension of `name`
pub fn from_name(name: &str) -> &'static str {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return OCTET_STREAM;
    };
    if stem.is_empty() && !file_name[1..].contains('.') {
        // dotfile such as ".gitignore"
        return OCTET_STREAM;
    }

    match ext.to_ascii_lowercase().as_str() {
        // Images
        "png" => "image/png",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "dng" => "image/x-adobe-dng",
        // Text
        "txt" | "text" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "xml" => "text/xml",
        "js" => "text/javascript",
        // Documents and data
        "json" => "application/json",
        "pdf" => "application/pdf",
        "rtf" => "application/rtf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        // Containers
        "zip" => "application/zip",
        "jar" => "application/java-archive",
        "apk" => "application/vnd.android.package-archive",
        "epub" => "application/epub+zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        // Audio and video
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/x-wav",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(from_name("x/y.png"), "image/png");
        assert_eq!(from_name("PHOTO.JPG"), "image/jpeg");
        assert_eq!(from_name("notes.txt"), "text/plain");
        assert_eq!(from_name("Makefile"), OCTET_STREAM);
        assert_eq!(from_name(".gitignore"), OCTET_STREAM);
        assert_eq!(from_name("dir.v2/readme"), OCTET_STREAM);
        assert_eq!(from_name("weird.unknownext"), OCTET_STREAM);
    }

    #[test]
    fn test_supported_containers() {
        assert!(is_supported_container("application/zip"));
        assert!(is_supported_container("Application/ZIP"));
        assert!(!is_supported_container("application/x-tar"));
        assert!(!is_supported_container("image/png"));
    }

    #[test]
    fn test_is_image() {
        assert!(is_image("image/png"));
        assert!(!is_image(DIRECTORY_MIME));
    }
}
