//! Notes Sync Example
//!
//! This example demonstrates:
//! - Registering an entity descriptor and starting a sync engine
//! - Offline edits pushed on the next sync cycle
//! - A second device pulling changes through delta fetches
//! - Conflict resolution when both devices edit the same note
//! - Accepting a read-only share from another account

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use zonesync_engine::{EngineConfig, LoopbackRemote, SyncEngine, WakeSignal};
use zonesync_protocol::{
    FieldValue, RecordId, RemoteRecord, ShareMetadata, ZoneId, SHARE_PERMISSION_FIELD,
    SHARE_RECORD_TYPE, SHARE_ROOT_FIELD,
};
use zonesync_store::{
    EntityDescriptor, EntityFilter, FieldKind, MemoryBlobStore, MemoryEntityStore,
};

fn note_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("note")
        .with_field("title", FieldKind::Text)
        .with_optional_field("body", FieldKind::Text)
}

fn note_fields(title: &str, body: &str) -> BTreeMap<String, FieldValue> {
    let mut fields = BTreeMap::new();
    fields.insert("title".to_string(), FieldValue::from(title));
    fields.insert("body".to_string(), FieldValue::from(body));
    fields
}

/// A fresh engine over its own in-memory stores, sharing the account's
/// service with every other device built from the same remote.
fn new_device(
    remote: &Arc<LoopbackRemote>,
) -> Result<SyncEngine<LoopbackRemote>, Box<dyn std::error::Error>> {
    let engine = SyncEngine::new(
        EngineConfig::new("notes"),
        Arc::clone(remote),
        Arc::new(MemoryEntityStore::new()),
        Arc::new(MemoryBlobStore::new()),
    );
    engine.register(vec![note_descriptor()])?;
    Ok(engine)
}

fn print_notes(
    label: &str,
    engine: &SyncEngine<LoopbackRemote>,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EntityFilter::any().with_record_type("note").with_deleted(false);
    println!("  📋 Notes on {label}:");
    for note in engine.entities(&filter)? {
        let title = note
            .field("title")
            .and_then(FieldValue::as_text)
            .unwrap_or("(untitled)");
        let status = if note.synced { "✅" } else { "✏️ " };
        let origin = if note.is_shared() {
            format!(" (shared by {})", note.owner_name)
        } else {
            String::new()
        };
        println!("    📄 {status} {title}{origin}");
    }
    Ok(())
}

fn body_of(
    engine: &SyncEngine<LoopbackRemote>,
    id: &RecordId,
) -> Result<String, Box<dyn std::error::Error>> {
    let entity = engine.entity(id)?.ok_or("note not found")?;
    Ok(entity
        .field("body")
        .and_then(FieldValue::as_text)
        .unwrap_or("")
        .to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("🔄 Notes Sync Example");
    println!("=====================\n");

    let remote = Arc::new(LoopbackRemote::new());

    // 1. Edits made while stopped are plain local writes; nothing reaches
    //    the service until the engine starts and a push cycle runs.
    println!("📴 Device A takes notes offline...");
    let device_a = new_device(&remote)?;
    device_a.save_local(
        &RecordId::new("grocery"),
        "note",
        note_fields("Groceries", "milk, eggs, coffee"),
    )?;
    device_a.save_local(
        &RecordId::new("standup"),
        "note",
        note_fields("Standup", "demo the sync engine"),
    )?;
    println!("  ✏️  2 notes saved while stopped\n");

    println!("🚀 Device A starts and pushes...");
    device_a.start();
    device_a.drain();
    device_a.sync();
    device_a.drain();
    print_notes("device A", &device_a)?;

    // 2. A second device behind the same account pulls everything during
    //    its initial fetch.
    println!("\n📱 Device B comes online...");
    let device_b = new_device(&remote)?;
    device_b.start();
    device_b.drain();
    print_notes("device B", &device_b)?;

    // 3. Concurrent edits to the same note: device B pushes with a stale
    //    change tag, the service rejects it, and the engine overlays B's
    //    fields onto the current server record and resubmits.
    println!("\n⚔️  Both devices edit the standup note...");
    device_a.save_local(
        &RecordId::new("standup"),
        "note",
        note_fields("Standup", "ship it"),
    )?;
    device_a.sync();
    device_a.drain();

    device_b.save_local(
        &RecordId::new("standup"),
        "note",
        note_fields("Standup", "blocked on review"),
    )?;
    device_b.sync();
    device_b.drain();

    device_a.fetch_changes();
    device_a.drain();
    println!("  🅰️  device A reads: \"{}\"", body_of(&device_a, &RecordId::new("standup"))?);
    println!("  🅱️  device B reads: \"{}\"", body_of(&device_b, &RecordId::new("standup"))?);

    // 4. Deletes travel the same way: tombstone, push, fetch.
    println!("\n🗑️  Device B deletes the grocery list...");
    device_b.delete_local(&RecordId::new("grocery"))?;
    device_b.sync();
    device_b.drain();
    device_a.fetch_changes();
    device_a.drain();
    print_notes("device A", &device_a)?;

    // 5. Someone else shares a note with this account. Accepting installs
    //    their zone in the shared database and fetches its records.
    println!("\n🤝 A colleague shares their retro agenda...");
    let owner_zone = ZoneId::new("notes", "colleague");
    let metadata = ShareMetadata {
        share_id: RecordId::new("share-retro"),
        zone: owner_zone.clone(),
    };
    let mut shared_note = RemoteRecord::new(RecordId::new("retro"), "note", owner_zone.clone());
    shared_note.set_field("title", FieldValue::from("Retro agenda"));
    shared_note.set_field("body", FieldValue::from("what went well"));
    shared_note.share = Some(RecordId::new("share-retro"));
    let mut share_record = RemoteRecord::new(
        RecordId::new("share-retro"),
        SHARE_RECORD_TYPE,
        owner_zone.clone(),
    );
    share_record.set_field(SHARE_PERMISSION_FIELD, FieldValue::from(false));
    share_record.set_field(SHARE_ROOT_FIELD, FieldValue::from("retro"));
    remote.stage_share(&metadata, vec![shared_note, share_record]);

    device_a.accept_incoming_share(&metadata)?;
    device_a.drain();
    print_notes("device A", &device_a)?;
    if let Some(handle) = device_a.fetch_share(&RecordId::new("retro")) {
        println!(
            "    🔗 share {} in zone {} (read-write: {})",
            handle.id, handle.zone, handle.read_write
        );
    }

    // 6. Sharing our own note creates a share record next to it.
    println!("\n📨 Device A shares the standup note...");
    let handle = device_a.create_share(&RecordId::new("standup"))?;
    println!("    🔗 created share {} (read-write: {})", handle.id, handle.read_write);

    // 7. Wake signals route by subscription id and coalesce while a fetch
    //    for the same database is already running.
    println!("\n📡 A push notification arrives...");
    let ack = device_a.handle_wake_signal(&WakeSignal::new("private-changes"));
    println!("    ⏰ wake ack: {ack:?}");
    device_a.drain();

    println!("\n📊 Statistics:");
    let counts = remote.counts();
    println!("  Database fetches:  {}", counts.database_fetches);
    println!("  Zone fetches:      {}", counts.zone_fetches);
    println!("  Modify batches:    {}", counts.modifies);
    println!("  Zones created:     {}", counts.zone_creates);
    println!("  Subscriptions:     {}", counts.subscriptions);
    println!("  Shares accepted:   {}", counts.share_accepts);

    device_a.stop();
    device_b.stop();
    println!("\n👋 Engines stopped");

    Ok(())
}
