use std::sync::Arc;
use tracing::Instrument;

use super::{drive_schedule, ArmedSlot, ManagerContext, ManagerHandle};
use crate::constants::timestamp_attribute_tags;
use crate::error::PostboxError;
use crate::models::{MessageUpdate, TimestampBasedMessageAttributesEntry};
use crate::store::{Postbox, PostboxView, ViewKey};

const SUBSYSTEM: &str = "Autoremove";

/// What happens to a message once its timeout entry is due.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AutoremoveMode {
    /// Delete the message (self-destruct)
    Remove,
    /// Replace its media with tombstones. Secret chat messages are deleted.
    Clear,
}

impl AutoremoveMode {
    pub fn tag(self) -> u16 {
        match self {
            AutoremoveMode::Remove => timestamp_attribute_tags::AUTOREMOVE,
            AutoremoveMode::Clear => timestamp_attribute_tags::AUTOCLEAR,
        }
    }

    fn manager_name(self) -> &'static str {
        match self {
            AutoremoveMode::Remove => "autoremove",
            AutoremoveMode::Clear => "autoclear",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AutoremoveOutcome {
    /// Message deleted; lists media resources nothing references anymore
    Deleted { released_media: Vec<String> },
    /// Media replaced by tombstones
    Cleared,
    /// The message is gone; only its index entry was dropped
    MissingMessage,
    /// The message no longer carries this entry, nothing to do
    Stale,
}

/// Start the manager for `mode`. Must be called from within a Tokio runtime.
pub fn managed_autoremove_message_operations(context: ManagerContext, mode: AutoremoveMode) -> ManagerHandle {
    let span = context.span.clone();
    let armed = Arc::new(ArmedSlot::default());
    let slot = armed.clone();
    let task = tokio::spawn(
        async move {
            tracing::info!(subsystem = SUBSYSTEM, ?mode, "Starting");
            drive_schedule(
                context,
                SUBSYSTEM,
                slot,
                ViewKey::TimestampBasedAttributes { tag: mode.tag() },
                |view: PostboxView| match view {
                    PostboxView::TimestampBasedAttributes(view) => Some(view.head),
                    _ => None,
                },
                move |context: ManagerContext, entry: TimestampBasedMessageAttributesEntry, _offset: i32| async move {
                    match perform_autoremove(&context.postbox, mode, entry).await {
                        Ok(outcome) => tracing::debug!(
                            subsystem = SUBSYSTEM,
                            message_id = %entry.message_id,
                            ?outcome,
                            "Performed"
                        ),
                        Err(error) => tracing::warn!(
                            subsystem = SUBSYSTEM,
                            message_id = %entry.message_id,
                            "Failed to perform: {}",
                            error
                        ),
                    }
                },
            )
            .await;
        }
        .instrument(span),
    );
    ManagerHandle::new(mode.manager_name(), task, armed)
}

/// Enact one due entry in a single transaction. Everything is re-validated
/// inside the transaction, so running it again for the same entry is a no-op.
pub async fn perform_autoremove(
    postbox: &Postbox,
    mode: AutoremoveMode,
    entry: TimestampBasedMessageAttributesEntry,
) -> Result<AutoremoveOutcome, PostboxError> {
    let tag = mode.tag();
    tracing::info!(
        subsystem = SUBSYSTEM,
        message_id = %entry.message_id,
        ?mode,
        "Performing"
    );

    postbox
        .transaction(move |txn| {
            let id = entry.message_id;
            let Some(message) = txn.get_message(id)? else {
                tracing::info!(subsystem = SUBSYSTEM, message_id = %id, "No message to autoremove");
                txn.clear_timestamp_based_attribute(id, tag)?;
                return Ok(AutoremoveOutcome::MissingMessage);
            };

            if !message
                .timestamp_based_attributes()
                .contains(&(tag, entry.timestamp))
            {
                return Ok(AutoremoveOutcome::Stale);
            }

            if mode == AutoremoveMode::Remove || id.peer_id.is_secret_chat() {
                let released_media = txn.delete_messages(&[id])?;
                return Ok(AutoremoveOutcome::Deleted { released_media });
            }

            txn.update_message(id, |current| MessageUpdate::Update(current.with_expired_content()))?;
            Ok(AutoremoveOutcome::Cleared)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{message_namespaces, peer_namespaces};
    use crate::models::{
        ExpiredContentKind, FileKind, Media, Message, MessageAttribute, MessageId, PeerId,
    };
    use crate::seed::SeedConfiguration;

    fn voice_note(peer_id: PeerId, id: i32) -> Message {
        let mut message = Message::new(MessageId::new(peer_id, message_namespaces::CLOUD, id), 1000, "");
        message.attributes = vec![
            MessageAttribute::Edited { date: 1001 },
            MessageAttribute::AutoclearTimeout {
                timeout: 10,
                countdown_begin: Some(1000),
            },
        ];
        message.media = vec![Media::File {
            id: 1,
            kind: FileKind::Voice,
            mime_type: "audio/ogg".to_string(),
            size: Some(2048),
            resource_ids: vec![format!("voice-{id}")],
        }];
        message
    }

    fn entry(message: &Message, mode: AutoremoveMode) -> TimestampBasedMessageAttributesEntry {
        TimestampBasedMessageAttributesEntry {
            tag: mode.tag(),
            timestamp: 1010,
            message_id: message.id,
        }
    }

    #[tokio::test]
    async fn test_clear_replaces_voice_note() {
        let postbox = Postbox::open_in_memory(SeedConfiguration::messenger_default()).unwrap();
        let peer = PeerId::new(peer_namespaces::CLOUD_USER, 1);
        let message = voice_note(peer, 5);
        let stored = message.clone();
        postbox.transaction(move |txn| txn.add_messages([stored])).await.unwrap();

        let outcome = perform_autoremove(&postbox, AutoremoveMode::Clear, entry(&message, AutoremoveMode::Clear))
            .await
            .unwrap();
        assert_eq!(outcome, AutoremoveOutcome::Cleared);

        let id = message.id;
        let cleared = postbox.transaction(move |txn| txn.get_message(id)).await.unwrap().unwrap();
        assert_eq!(
            cleared.media,
            vec![Media::ExpiredContent {
                kind: ExpiredContentKind::VoiceMessage
            }]
        );
        assert_eq!(cleared.attributes, vec![MessageAttribute::Edited { date: 1001 }]);
        assert_eq!(cleared.timestamp, message.timestamp);
        assert_eq!(cleared.text, message.text);

        let head = postbox
            .transaction(|txn| txn.timestamp_based_attributes_head(timestamp_attribute_tags::AUTOCLEAR))
            .await
            .unwrap();
        assert_eq!(head, None);
    }

    #[tokio::test]
    async fn test_clear_deletes_secret_chat_message() {
        let postbox = Postbox::open_in_memory(SeedConfiguration::messenger_default()).unwrap();
        let peer = PeerId::new(peer_namespaces::SECRET_CHAT, 1);
        let message = voice_note(peer, 5);
        let stored = message.clone();
        postbox.transaction(move |txn| txn.add_messages([stored])).await.unwrap();

        let outcome = perform_autoremove(&postbox, AutoremoveMode::Clear, entry(&message, AutoremoveMode::Clear))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AutoremoveOutcome::Deleted {
                released_media: vec!["voice-5".to_string()]
            }
        );

        let id = message.id;
        assert_eq!(postbox.transaction(move |txn| txn.get_message(id)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let postbox = Postbox::open_in_memory(SeedConfiguration::messenger_default()).unwrap();
        let peer = PeerId::new(peer_namespaces::CLOUD_USER, 1);
        let message = voice_note(peer, 5);
        let stored = message.clone();
        postbox.transaction(move |txn| txn.add_messages([stored])).await.unwrap();
        let due = entry(&message, AutoremoveMode::Clear);

        perform_autoremove(&postbox, AutoremoveMode::Clear, due).await.unwrap();
        let id = message.id;
        let after_first = postbox.transaction(move |txn| txn.get_message(id)).await.unwrap();

        let outcome = perform_autoremove(&postbox, AutoremoveMode::Clear, due).await.unwrap();
        assert_eq!(outcome, AutoremoveOutcome::Stale);
        let after_second = postbox.transaction(move |txn| txn.get_message(id)).await.unwrap();
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_missing_message_drops_entry() {
        let postbox = Postbox::open_in_memory(SeedConfiguration::messenger_default()).unwrap();
        let peer = PeerId::new(peer_namespaces::CLOUD_USER, 1);
        let missing = Message::new(MessageId::new(peer, message_namespaces::CLOUD, 77), 0, "");

        let outcome = perform_autoremove(&postbox, AutoremoveMode::Remove, entry(&missing, AutoremoveMode::Remove))
            .await
            .unwrap();
        assert_eq!(outcome, AutoremoveOutcome::MissingMessage);
    }

    #[tokio::test]
    async fn test_clear_releases_head_with_repeated_timeouts() {
        let postbox = Postbox::open_in_memory(SeedConfiguration::messenger_default()).unwrap();
        let peer = PeerId::new(peer_namespaces::CLOUD_USER, 1);
        let mut message = voice_note(peer, 6);
        message.attributes = vec![
            MessageAttribute::AutoclearTimeout {
                timeout: 5,
                countdown_begin: Some(100),
            },
            MessageAttribute::AutoclearTimeout {
                timeout: 10,
                countdown_begin: Some(100),
            },
        ];
        postbox.transaction(move |txn| txn.add_messages([message])).await.unwrap();

        let head = postbox
            .transaction(|txn| txn.timestamp_based_attributes_head(timestamp_attribute_tags::AUTOCLEAR))
            .await
            .unwrap()
            .unwrap();
        let outcome = perform_autoremove(&postbox, AutoremoveMode::Clear, head).await.unwrap();
        assert_eq!(outcome, AutoremoveOutcome::Cleared);

        let after = postbox
            .transaction(|txn| txn.timestamp_based_attributes_head(timestamp_attribute_tags::AUTOCLEAR))
            .await
            .unwrap();
        assert_eq!(after, None);
    }
}
