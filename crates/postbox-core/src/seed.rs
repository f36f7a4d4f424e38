//! Static schema description consumed when the store is opened.
//!
//! A `SeedConfiguration` decides which histories take part in the global
//! message id index, which (peer namespace, message namespace) pairs are
//! hole-tracked and for which tag sets, which single tag carries a maintained
//! per-peer count, and how peers map to summary counter tags. It is validated
//! once by the builder and never mutated afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::constants::{message_namespaces, peer_namespaces};
use crate::error::ConfigError;
use crate::models::{
    ChatListHole, GlobalMessageTags, MessageNamespace, MessageTags, Peer, PeerKind,
    PeerNamespace, PeerSummaryCounterTags,
};

/// Declares that a (peer namespace, message namespace) pair participates in
/// the global message id index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlobalMessageIdsNamespace {
    pub peer_namespace: PeerNamespace,
    pub message_namespace: MessageNamespace,
}

impl GlobalMessageIdsNamespace {
    pub const fn new(peer_namespace: PeerNamespace, message_namespace: MessageNamespace) -> Self {
        Self {
            peer_namespace,
            message_namespace,
        }
    }
}

pub type MessageHoles = HashMap<PeerNamespace, HashMap<MessageNamespace, HashSet<MessageTags>>>;

pub type PeerSummaryCounterTagsFn = Arc<dyn Fn(&Peer) -> PeerSummaryCounterTags + Send + Sync>;

#[derive(Clone)]
pub struct SeedConfiguration {
    global_message_ids_peer_id_namespaces: HashSet<GlobalMessageIdsNamespace>,
    initialize_chat_list_with_hole: (Option<ChatListHole>, Option<ChatListHole>),
    message_holes: MessageHoles,
    initialize_message_namespaces_with_holes: Vec<(PeerNamespace, MessageNamespace)>,
    existing_message_tags: MessageTags,
    message_tags_with_summary: MessageTags,
    existing_global_message_tags: GlobalMessageTags,
    peer_namespaces_requiring_message_text_index: Vec<PeerNamespace>,
    peer_summary_counter_tags: PeerSummaryCounterTagsFn,
    additional_chat_list_index_namespace: Option<MessageNamespace>,
}

impl fmt::Debug for SeedConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedConfiguration")
            .field(
                "global_message_ids_peer_id_namespaces",
                &self.global_message_ids_peer_id_namespaces,
            )
            .field(
                "initialize_chat_list_with_hole",
                &self.initialize_chat_list_with_hole,
            )
            .field("message_holes", &self.message_holes)
            .field(
                "initialize_message_namespaces_with_holes",
                &self.initialize_message_namespaces_with_holes,
            )
            .field("existing_message_tags", &self.existing_message_tags)
            .field("message_tags_with_summary", &self.message_tags_with_summary)
            .field(
                "existing_global_message_tags",
                &self.existing_global_message_tags,
            )
            .field(
                "peer_namespaces_requiring_message_text_index",
                &self.peer_namespaces_requiring_message_text_index,
            )
            .field(
                "additional_chat_list_index_namespace",
                &self.additional_chat_list_index_namespace,
            )
            .finish_non_exhaustive()
    }
}

impl SeedConfiguration {
    pub fn builder() -> SeedConfigurationBuilder {
        SeedConfigurationBuilder::default()
    }

    /// Stock schema: cloud users, groups and channels keep hole-tracked cloud
    /// histories for every media tag; secret chats are local-only.
    pub fn messenger_default() -> Self {
        let media_tags: HashSet<MessageTags> = [
            MessageTags::PHOTO_OR_VIDEO,
            MessageTags::PHOTO,
            MessageTags::VIDEO,
            MessageTags::FILE,
            MessageTags::MUSIC,
            MessageTags::WEB_PAGE,
            MessageTags::VOICE_OR_INSTANT_VIDEO,
            MessageTags::GIF,
            MessageTags::PINNED,
            MessageTags::UNSEEN_PERSONAL_MESSAGE,
            MessageTags::UNSEEN_REACTION,
        ]
        .into_iter()
        .collect();

        let cloud_peers = [
            peer_namespaces::CLOUD_USER,
            peer_namespaces::CLOUD_GROUP,
            peer_namespaces::CLOUD_CHANNEL,
        ];

        let mut builder = SeedConfiguration::builder()
            .global_message_ids_namespace(GlobalMessageIdsNamespace::new(
                peer_namespaces::CLOUD_USER,
                message_namespaces::CLOUD,
            ))
            .global_message_ids_namespace(GlobalMessageIdsNamespace::new(
                peer_namespaces::CLOUD_GROUP,
                message_namespaces::CLOUD,
            ))
            .initialize_chat_list_with_hole(
                Some(ChatListHole::upper_bound()),
                Some(ChatListHole::upper_bound()),
            )
            .existing_message_tags(media_tags.iter().fold(MessageTags::empty(), |acc, t| acc | *t))
            .message_tags_with_summary(MessageTags::UNSEEN_PERSONAL_MESSAGE)
            .existing_global_message_tags(GlobalMessageTags::CALLS | GlobalMessageTags::MISSED_CALLS)
            .peer_summary_counter_tags(default_peer_summary_counter_tags)
            .additional_chat_list_index_namespace(Some(message_namespaces::LOCAL));

        for peer_namespace in cloud_peers {
            builder = builder
                .message_holes(peer_namespace, message_namespaces::CLOUD, media_tags.clone())
                .initialize_message_namespace_with_holes(peer_namespace, message_namespaces::CLOUD)
                .peer_namespace_requiring_message_text_index(peer_namespace);
        }

        // The stock tables above are consistent by construction.
        match builder.build() {
            Ok(seed) => seed,
            Err(error) => unreachable!("stock seed configuration is invalid: {error}"),
        }
    }

    pub fn is_global_message_ids_namespace(
        &self,
        peer_namespace: PeerNamespace,
        message_namespace: MessageNamespace,
    ) -> bool {
        self.global_message_ids_peer_id_namespaces
            .contains(&GlobalMessageIdsNamespace::new(peer_namespace, message_namespace))
    }

    pub fn initialize_chat_list_with_hole(&self) -> (Option<ChatListHole>, Option<ChatListHole>) {
        self.initialize_chat_list_with_hole
    }

    /// Hole-tracked tag sets of a history, or `None` when the history does not
    /// support holes at all.
    pub fn hole_tag_sets(
        &self,
        peer_namespace: PeerNamespace,
        message_namespace: MessageNamespace,
    ) -> Option<&HashSet<MessageTags>> {
        self.message_holes
            .get(&peer_namespace)
            .and_then(|namespaces| namespaces.get(&message_namespace))
    }

    pub fn initializes_with_hole(
        &self,
        peer_namespace: PeerNamespace,
        message_namespace: MessageNamespace,
    ) -> bool {
        self.initialize_message_namespaces_with_holes
            .contains(&(peer_namespace, message_namespace))
    }

    pub fn existing_message_tags(&self) -> MessageTags {
        self.existing_message_tags
    }

    /// The single tag whose per-peer count is maintained, if any.
    pub fn summary_tag(&self) -> Option<MessageTags> {
        (!self.message_tags_with_summary.is_empty()).then_some(self.message_tags_with_summary)
    }

    pub fn existing_global_message_tags(&self) -> GlobalMessageTags {
        self.existing_global_message_tags
    }

    pub fn requires_text_index(&self, peer_namespace: PeerNamespace) -> bool {
        self.peer_namespaces_requiring_message_text_index
            .contains(&peer_namespace)
    }

    pub fn peer_summary_counter_tags(&self, peer: &Peer) -> PeerSummaryCounterTags {
        (self.peer_summary_counter_tags)(peer)
    }

    /// Namespaces whose messages position a peer in the chat list.
    pub fn chat_list_index_namespaces(&self) -> Vec<MessageNamespace> {
        let mut namespaces = vec![message_namespaces::CLOUD];
        if let Some(additional) = self.additional_chat_list_index_namespace {
            if additional != message_namespaces::CLOUD {
                namespaces.push(additional);
            }
        }
        namespaces
    }
}

fn default_peer_summary_counter_tags(peer: &Peer) -> PeerSummaryCounterTags {
    match &peer.kind {
        PeerKind::User { is_bot: true, .. } => PeerSummaryCounterTags::BOT,
        PeerKind::User {
            is_contact: true, ..
        } => PeerSummaryCounterTags::CONTACT,
        PeerKind::User { .. } | PeerKind::SecretChat { .. } => PeerSummaryCounterTags::NON_CONTACT,
        PeerKind::Group => PeerSummaryCounterTags::GROUP,
        PeerKind::Channel { broadcast: true } => PeerSummaryCounterTags::CHANNEL,
        PeerKind::Channel { broadcast: false } => PeerSummaryCounterTags::GROUP,
    }
}

pub struct SeedConfigurationBuilder {
    config: SeedConfiguration,
}

impl Default for SeedConfigurationBuilder {
    fn default() -> Self {
        Self {
            config: SeedConfiguration {
                global_message_ids_peer_id_namespaces: HashSet::new(),
                initialize_chat_list_with_hole: (None, None),
                message_holes: HashMap::new(),
                initialize_message_namespaces_with_holes: Vec::new(),
                existing_message_tags: MessageTags::empty(),
                message_tags_with_summary: MessageTags::empty(),
                existing_global_message_tags: GlobalMessageTags::empty(),
                peer_namespaces_requiring_message_text_index: Vec::new(),
                peer_summary_counter_tags: Arc::new(|_| PeerSummaryCounterTags::empty()),
                additional_chat_list_index_namespace: None,
            },
        }
    }
}

impl SeedConfigurationBuilder {
    pub fn global_message_ids_namespace(mut self, namespace: GlobalMessageIdsNamespace) -> Self {
        self.config
            .global_message_ids_peer_id_namespaces
            .insert(namespace);
        self
    }

    pub fn initialize_chat_list_with_hole(
        mut self,
        top_level: Option<ChatListHole>,
        groups: Option<ChatListHole>,
    ) -> Self {
        self.config.initialize_chat_list_with_hole = (top_level, groups);
        self
    }

    pub fn message_holes(
        mut self,
        peer_namespace: PeerNamespace,
        message_namespace: MessageNamespace,
        tag_sets: HashSet<MessageTags>,
    ) -> Self {
        self.config
            .message_holes
            .entry(peer_namespace)
            .or_default()
            .insert(message_namespace, tag_sets);
        self
    }

    pub fn initialize_message_namespace_with_holes(
        mut self,
        peer_namespace: PeerNamespace,
        message_namespace: MessageNamespace,
    ) -> Self {
        self.config
            .initialize_message_namespaces_with_holes
            .push((peer_namespace, message_namespace));
        self
    }

    pub fn existing_message_tags(mut self, tags: MessageTags) -> Self {
        self.config.existing_message_tags = tags;
        self
    }

    pub fn message_tags_with_summary(mut self, tags: MessageTags) -> Self {
        self.config.message_tags_with_summary = tags;
        self
    }

    pub fn existing_global_message_tags(mut self, tags: GlobalMessageTags) -> Self {
        self.config.existing_global_message_tags = tags;
        self
    }

    pub fn peer_namespace_requiring_message_text_index(mut self, namespace: PeerNamespace) -> Self {
        self.config
            .peer_namespaces_requiring_message_text_index
            .push(namespace);
        self
    }

    pub fn peer_summary_counter_tags<F>(mut self, f: F) -> Self
    where
        F: Fn(&Peer) -> PeerSummaryCounterTags + Send + Sync + 'static,
    {
        self.config.peer_summary_counter_tags = Arc::new(f);
        self
    }

    pub fn additional_chat_list_index_namespace(mut self, namespace: Option<MessageNamespace>) -> Self {
        self.config.additional_chat_list_index_namespace = namespace;
        self
    }

    pub fn build(self) -> Result<SeedConfiguration, ConfigError> {
        let config = self.config;

        if config.message_tags_with_summary.len() > 1 {
            return Err(ConfigError::MultipleSummaryTags(
                config.message_tags_with_summary.bits(),
            ));
        }

        let mut referenced = config.message_tags_with_summary;
        for namespaces in config.message_holes.values() {
            for tag_sets in namespaces.values() {
                for tags in tag_sets {
                    referenced |= *tags;
                }
            }
        }
        let unknown = referenced.bits() & !config.existing_message_tags.bits();
        if unknown != 0 {
            return Err(ConfigError::UnknownTags(unknown));
        }

        Ok(config)
    }
}
