use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use postbox_core::constants::timestamp_attribute_tags;
use postbox_core::managers::FixedTimeOffset;
use postbox_core::models::{HoleSpace, MessageNamespace, PeerId, PeerNamespace};
use postbox_core::{CoreConfig, CoreRuntime, Postbox, SeedConfiguration};

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

fn format_timestamp(timestamp: i32) -> String {
    Utc.timestamp_opt(i64::from(timestamp), 0)
        .single()
        .map(|date| date.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn inspect(config: &CoreConfig, pretty: bool) -> Result<()> {
    let postbox = Postbox::open(config, SeedConfiguration::messenger_default())?;

    let summary = postbox.transaction_blocking(|txn| {
        let autoremove = txn.timestamp_based_attributes_head(timestamp_attribute_tags::AUTOREMOVE)?;
        let autoclear = txn.timestamp_based_attributes_head(timestamp_attribute_tags::AUTOCLEAR)?;
        let story = txn.story_expiration_head()?;
        Ok(json!({
            "peers": txn.peer_count()?,
            "messages": txn.message_count()?,
            "autoremove_head": autoremove.map(|entry| json!({
                "message_id": entry.message_id.to_string(),
                "due": format_timestamp(entry.timestamp),
            })),
            "autoclear_head": autoclear.map(|entry| json!({
                "message_id": entry.message_id.to_string(),
                "due": format_timestamp(entry.timestamp),
            })),
            "story_expiration_head": story.map(|entry| json!({
                "peer_id": entry.id.peer_id.to_string(),
                "story_id": entry.id.id,
                "expires": format_timestamp(entry.expiration_timestamp),
            })),
        }))
    })?;

    let stats = postbox.stats().snapshot();
    let mut output = summary;
    output["transactions"] = json!({
        "committed": stats.committed,
        "failed": stats.failed,
        "average_ms": stats.average_duration().as_secs_f64() * 1000.0,
        "peak_ms": stats.peak_duration.as_secs_f64() * 1000.0,
        "version": stats.last_version,
    });
    print_json(&output, pretty)
}

pub fn holes(
    config: &CoreConfig,
    peer_namespace: i32,
    peer_id: i64,
    namespace: i32,
    pretty: bool,
) -> Result<()> {
    let postbox = Postbox::open(config, SeedConfiguration::messenger_default())?;
    let peer_id = PeerId::new(PeerNamespace(peer_namespace), peer_id);
    let namespace = MessageNamespace(namespace);

    let holes = postbox.transaction_blocking(move |txn| txn.all_message_holes(peer_id, namespace))?;
    let holes: Vec<Value> = holes
        .iter()
        .map(|hole| {
            let space = match hole.space {
                HoleSpace::Everywhere => "everywhere".to_string(),
                HoleSpace::Tag(tags) => format!("tags:{:#x}", tags.bits()),
            };
            json!({
                "space": space,
                "lower": hole.range.start(),
                "upper": hole.range.end(),
            })
        })
        .collect();

    print_json(
        &json!({
            "peer_id": peer_id.to_string(),
            "namespace": namespace.0,
            "holes": holes,
        }),
        pretty,
    )
}

pub fn run(config: CoreConfig) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let mut runtime = CoreRuntime::start(
            config,
            SeedConfiguration::messenger_default(),
            Arc::new(FixedTimeOffset::new(0.0)),
        )?;
        tracing::info!("Postbox running, press Ctrl-C to stop");

        tokio::signal::ctrl_c().await?;

        tracing::info!("Shutting down");
        runtime.shutdown();
        let stats = runtime.stats().snapshot();
        tracing::info!(
            committed = stats.committed,
            failed = stats.failed,
            "Transactions executed"
        );
        Ok::<(), anyhow::Error>(())
    })
}
