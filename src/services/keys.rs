//! Object key namespace.
//!
//! - `posts/{postId}/{uuid}{.ext}`: collection; every upload gets a fresh name.
//! - `profiles/{userId}/profile`: singleton; every write targets the same key.

use std::path::Path;
use uuid::Uuid;

const POSTS: &str = "posts";
const PROFILES: &str = "profiles";
const PROFILE_OBJECT: &str = "profile";
const MAX_EXTENSION_LEN: usize = 16;

/// A logical resource that owns an object.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    /// A new attachment of a post, named after the client's original file.
    PostAttachment {
        post_id: &'a str,
        original_name: &'a str,
    },
    /// An existing attachment addressed by its stored name.
    PostFile {
        post_id: &'a str,
        file_name: &'a str,
    },
    /// The profile image of a user.
    ProfileImage { user_id: &'a str },
}

impl Resource<'_> {
    /// Canonical key for this resource. Post attachments get a new key on
    /// every call.
    pub fn object_key(&self) -> String {
        match self {
            Resource::PostAttachment {
                post_id,
                original_name,
            } => post_file_key(post_id, &unique_name(original_name)),
            Resource::PostFile { post_id, file_name } => post_file_key(post_id, file_name),
            Resource::ProfileImage { user_id } => profile_key(user_id),
        }
    }
}

/// Key of an existing post attachment.
pub fn post_file_key(post_id: &str, file_name: &str) -> String {
    format!("{POSTS}/{post_id}/{file_name}")
}

/// Listing prefix covering every attachment of a post.
pub fn post_prefix(post_id: &str) -> String {
    format!("{POSTS}/{post_id}/")
}

pub fn profile_key(user_id: &str) -> String {
    format!("{PROFILES}/{user_id}/{PROFILE_OBJECT}")
}

/// UUID v4 name keeping the original extension when it is a plain
/// alphanumeric one.
pub fn unique_name(original: &str) -> String {
    let id = Uuid::new_v4();
    match extension_of(original) {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

fn extension_of(original: &str) -> Option<&str> {
    // Clients on Windows send backslash-separated paths.
    let base = original.rsplit(['/', '\\']).next().unwrap_or(original);
    Path::new(base)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
}

/// Path segments supplied by clients must stay within their own segment.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
        && !segment.bytes().any(|b| b.is_ascii_control())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn post_attachments_keep_their_extension() {
        let key = Resource::PostAttachment {
            post_id: "p1",
            original_name: "holiday photo.PNG",
        }
        .object_key();

        let name = key.strip_prefix("posts/p1/").unwrap();
        let (stem, ext) = name.split_once('.').unwrap();
        assert_eq!(ext, "PNG");
        assert!(Uuid::parse_str(stem).is_ok());
    }

    #[test]
    fn names_without_usable_extension_are_bare_uuids() {
        for original in ["README", ".bashrc", "archive.", "weird.p?g", "dir.d/file"] {
            let name = unique_name(original);
            assert!(Uuid::parse_str(&name).is_ok(), "{original} -> {name}");
        }
    }

    #[test]
    fn extension_comes_from_the_last_path_component() {
        assert!(unique_name("a/b/photo.jpg").ends_with(".jpg"));
        assert!(unique_name("C:\\Users\\me\\photo.webp").ends_with(".webp"));
        assert!(unique_name("photo.tar.gz").ends_with(".gz"));
    }

    #[test]
    fn post_attachment_keys_never_repeat() {
        let keys: HashSet<_> = (0..1000)
            .map(|_| {
                Resource::PostAttachment {
                    post_id: "p1",
                    original_name: "a.png",
                }
                .object_key()
            })
            .collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn existing_files_are_addressed_verbatim() {
        let key = Resource::PostFile {
            post_id: "p1",
            file_name: "3f0c.png",
        }
        .object_key();
        assert_eq!(key, "posts/p1/3f0c.png");
        assert_eq!(post_prefix("p1"), "posts/p1/");
    }

    #[test]
    fn profile_keys_are_stable() {
        let a = Resource::ProfileImage { user_id: "alice" }.object_key();
        let b = Resource::ProfileImage { user_id: "alice" }.object_key();
        assert_eq!(a, "profiles/alice/profile");
        assert_eq!(a, b);
    }

    #[test]
    fn segment_hygiene() {
        assert!(is_safe_segment("p1"));
        assert!(is_safe_segment("3f0c.png"));
        for bad in ["", ".", "..", "a/b", "a\\b", "a\nb"] {
            assert!(!is_safe_segment(bad), "{bad:?}");
        }
    }
}
