/// Wraps `content` in a BBCode quote attributed to `author`.
///
/// Double quotes in the author name would end the attribute early, so they are
/// replaced with single quotes.
pub fn quote(content: &str, author: &str) -> String {
    let author = author.replace('"', "'");
    format!("[quote=\"{author}\"]{content}[/quote]")
}

/// The user's selection when there is one, the whole post body otherwise.
pub fn quote_source<'a>(selection: Option<&'a str>, body: &'a str) -> &'a str {
    match selection {
        Some(s) if !s.trim().is_empty() => s,
        _ => body,
    }
}
