use url::Url;

/// File extensions that are never HTML and are skipped when following links
const IGNORED_EXTENSIONS: &[&str] = &[
    "ai", "aif", "aifc", "aiff", "asc", "au", "avi", "bin", "bmp", "c", "cc", "class", "cpio",
    "css", "csv", "dcr", "dir", "dmg", "doc", "docx", "dvi", "dwg", "dxf", "eps", "exe", "flv",
    "gif", "gtar", "gz", "h", "hqx", "ico", "ief", "iso", "jar", "jpe", "jpeg", "jpg", "js",
    "json", "kar", "latex", "lha", "lzh", "m4a", "man", "mid", "midi", "mov", "movie", "mp2",
    "mp3", "mp4", "mpe", "mpeg", "mpg", "mpga", "msi", "ogg", "pbm", "pdf", "pgm", "png", "pnm",
    "ppm", "pps", "ppt", "pptx", "ps", "qt", "ra", "ram", "ras", "rgb", "rm", "rpm", "rtf",
    "sh", "snd", "svg", "swf", "tar", "tcl", "tex", "tgz", "tif", "tiff", "tsv", "txt", "wav",
    "webm", "webp", "wmv", "woff", "woff2", "xbm", "xls", "xlsx", "xml", "xpm", "xwd", "zip",
];

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use webtrawl::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns true if both URLs are on the same site
///
/// Subdomains count as the same site in either direction, so
/// `blog.example.com` and `example.com` match.
pub fn is_same_site(a: &Url, b: &Url) -> bool {
    match (extract_domain(a), extract_domain(b)) {
        (Some(a), Some(b)) => {
            a == b || a.ends_with(&format!(".{}", b)) || b.ends_with(&format!(".{}", a))
        }
        _ => false,
    }
}

/// Returns true if the URL path ends in a known non-HTML file extension
pub fn has_ignored_extension(url: &Url) -> bool {
    let last_segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");

    match last_segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            IGNORED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}
