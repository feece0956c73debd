//! Endpoint normalisation
//!
//! Requests are queued per endpoint key: the path without base URL, API
//! version, query string or trailing slash. Ids directly after a major
//! resource stay in the key because they select their own bucket; every
//! other numeric segment collapses to `:id`.

const MAJOR_RESOURCES: [&str; 3] = ["channels", "guilds", "webhooks"];

/// Normalised queue key for a request path or full URL
///
/// ```
/// use shardline_rest::endpoint_key;
///
/// assert_eq!(
///     endpoint_key("https://discord.com/api/v10/channels/1036710154319708241/messages/"),
///     "/channels/1036710154319708241/messages"
/// );
/// assert_eq!(endpoint_key("/users/80351110224678912"), "/users/:id");
/// ```
#[must_use]
pub fn endpoint_key(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = match path.find("://") {
        Some(index) => {
            let rest = &path[index + 3..];
            rest.find('/').map_or("", |slash| &rest[slash..])
        }
        None => path,
    };

    let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
    if segments.peek() == Some(&"api") {
        segments.next();
    }
    if segments.peek().is_some_and(|s| is_version(s)) {
        segments.next();
    }

    let mut key = String::new();
    let mut previous: Option<&str> = None;
    for segment in segments {
        key.push('/');
        if is_id(segment) && !previous.is_some_and(|p| MAJOR_RESOURCES.contains(&p)) {
            key.push_str(":id");
        } else {
            key.push_str(segment);
        }
        previous = Some(segment);
    }

    if key.is_empty() {
        key.push('/');
    }
    key
}

fn is_version(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
