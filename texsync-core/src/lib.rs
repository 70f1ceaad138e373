mod client;
mod hash;

pub use client::{
    ApiErrorClass, ClientOptions, Commit, EntryType, GithubClient, GithubError, Tree, TreeEntry,
};
pub use hash::blob_sha1;
