//! Task input types.
//!
//! An [`AgentTask`] is the input envelope every agent accepts: a text prompt,
//! optional multimodal [`Attachment`]s, and a metadata map keyed by
//! well-known identifiers. The framework reads only the three well-known
//! keys, exposed through typed accessors; everything else in the map is
//! opaque and passes through untouched.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Metadata key carrying the conversation thread id.
pub const META_THREAD_ID: &str = "thread_id";

/// Metadata key carrying the user id.
pub const META_USER_ID: &str = "user_id";

/// Metadata key carrying the chat/channel id.
pub const META_CHAT_ID: &str = "chat_id";

/// A MIME-typed binary payload passed with a task or returned in a result.
///
/// The payload is held in a [`Bytes`] buffer and treated as immutable:
/// cloning an attachment aliases the payload instead of copying it, which is
/// what makes attachment propagation through delegation chains cheap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Optional display name (e.g. a file name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// MIME content type (e.g. `image/png`).
    pub mime_type: String,

    /// The payload. Not serialized; events and results carry only the size.
    #[serde(skip)]
    pub data: Bytes,
}

impl Attachment {
    /// Create a new attachment from a MIME type and payload.
    #[must_use]
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: None,
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the declared MIME type parses as a valid media type.
    #[must_use]
    pub fn has_valid_mime(&self) -> bool {
        self.mime_type.parse::<mime::Mime>().is_ok()
    }
}

/// Input envelope for one agent execution.
///
/// Created by the caller, read-only inside the loop. Sub-agent delegation
/// derives child tasks via [`AgentTask::child`], which inherits attachments
/// and metadata from the parent.
#[derive(Debug, Clone, Default)]
pub struct AgentTask {
    /// The text prompt.
    pub task: String,

    /// Multimodal payloads accompanying the prompt.
    pub attachments: Vec<Attachment>,

    /// Opaque metadata. The framework reads only [`META_THREAD_ID`],
    /// [`META_USER_ID`], and [`META_CHAT_ID`].
    pub metadata: HashMap<String, String>,
}

impl AgentTask {
    /// Create a new task with the given prompt.
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            attachments: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Add an attachment.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the conversation thread id.
    #[must_use]
    pub fn with_thread_id(self, thread_id: impl Into<String>) -> Self {
        self.with_metadata(META_THREAD_ID, thread_id)
    }

    /// Set the user id.
    #[must_use]
    pub fn with_user_id(self, user_id: impl Into<String>) -> Self {
        self.with_metadata(META_USER_ID, user_id)
    }

    /// The conversation thread id, when set.
    #[must_use]
    pub fn thread_id(&self) -> Option<&str> {
        self.metadata.get(META_THREAD_ID).map(String::as_str)
    }

    /// The user id, when set.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get(META_USER_ID).map(String::as_str)
    }

    /// The chat id, when set.
    #[must_use]
    pub fn chat_id(&self) -> Option<&str> {
        self.metadata.get(META_CHAT_ID).map(String::as_str)
    }

    /// Derive a child task for sub-agent delegation.
    ///
    /// The child carries its own prompt but inherits the parent's
    /// attachments (aliased, not copied) and metadata.
    #[must_use]
    pub fn child(&self, task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            attachments: self.attachments.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_clone_aliases_payload() {
        let payload = Bytes::from(vec![1u8; 1024]);
        let a = Attachment::new("image/png", payload.clone());
        let b = a.clone();
        // Bytes::clone shares the same backing allocation.
        assert_eq!(a.data.as_ptr(), b.data.as_ptr());
        assert_eq!(b.len(), 1024);
    }

    #[test]
    fn attachment_mime_validation() {
        assert!(Attachment::new("image/png", "x").has_valid_mime());
        assert!(!Attachment::new("not a mime", "x").has_valid_mime());
    }

    #[test]
    fn typed_metadata_accessors() {
        let task = AgentTask::new("hello")
            .with_thread_id("t-1")
            .with_user_id("u-1")
            .with_metadata(META_CHAT_ID, "c-1")
            .with_metadata("custom", "kept");
        assert_eq!(task.thread_id(), Some("t-1"));
        assert_eq!(task.user_id(), Some("u-1"));
        assert_eq!(task.chat_id(), Some("c-1"));
        assert_eq!(task.metadata.get("custom").map(String::as_str), Some("kept"));
    }

    #[test]
    fn child_inherits_attachments_and_metadata() {
        let parent = AgentTask::new("parent")
            .with_thread_id("t-9")
            .with_attachment(Attachment::new("text/plain", "data"));
        let child = parent.child("delegated work");
        assert_eq!(child.task, "delegated work");
        assert_eq!(child.thread_id(), Some("t-9"));
        assert_eq!(child.attachments.len(), 1);
    }
}
