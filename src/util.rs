use chrono::Local;

pub fn now_ts() -> String {
    let now = Local::now();
    now.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Timestamp safe for file names, e.g. `20250101-093000`.
pub fn file_stamp() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// File extension for a generated media MIME type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        m if m.contains("png") => ".png",
        m if m.contains("jpeg") || m.contains("jpg") => ".jpg",
        m if m.contains("webp") => ".webp",
        m if m.contains("mp4") => ".mp4",
        m if m.contains("wav") || m.contains("pcm") || m.contains("l16") => ".wav",
        m if m.contains("mpeg") || m.contains("mp3") => ".mp3",
        _ => ".bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_path_safe() {
        assert!(!file_stamp().contains([':', ' ', '/']));
        assert_eq!(file_stamp().len(), 15);
    }

    #[test]
    fn mime_extensions() {
        assert_eq!(extension_for_mime("image/png"), ".png");
        assert_eq!(extension_for_mime("image/jpeg"), ".jpg");
        assert_eq!(extension_for_mime("audio/L16;rate=24000"), ".wav");
        assert_eq!(extension_for_mime("video/mp4"), ".mp4");
    }
}
