use std::path::Path;

pub fn format_number(num: u64) -> String {
    let num_str = num.to_string();
    let chars: Vec<char> = num_str.chars().collect();
    let mut result = String::new();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// MIME type for a downloaded media file, from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("m4a") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// `Content-Disposition` value that makes the browser save `file_name`.
pub fn attachment_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

/// Host part of a source URL for log fields, or `"-"` when it has none.
pub fn source_host(source_url: &str) -> String {
    url::Url::parse(source_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(100), "100");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("/tmp/a.mp4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("a.WEBM")), "video/webm");
        assert_eq!(content_type_for(Path::new("a.m4a")), "audio/mp4");
        assert_eq!(
            content_type_for(Path::new("a")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_attachment_disposition() {
        assert_eq!(
            attachment_disposition("abc.mp4"),
            "attachment; filename=\"abc.mp4\""
        );
        assert_eq!(
            attachment_disposition("a\"b\\c/d\n.mp4"),
            "attachment; filename=\"a_b_c_d_.mp4\""
        );
    }

    #[test]
    fn test_source_host() {
        assert_eq!(source_host("https://www.youtube.com/watch?v=abc"), "www.youtube.com");
        assert_eq!(source_host("ytsearch:cats"), "-");
        assert_eq!(source_host("not a url"), "-");
    }
}
