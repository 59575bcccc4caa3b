//! End-to-end behavior of an `InkSession` against in-memory collaborators.

use inkpage_core::api::{ApiCall, ApiMode, MemoryStrokeApi};
use inkpage_core::realtime::SocketEvent;
use inkpage_core::realtime::scripted::ScriptedConnector;
use inkpage_core::spawn::InlineSpawner;
use inkpage_core::storage::MemoryOfflineStore;
use inkpage_core::{
    ChannelState, ElementRect, InkConfig, InkPoint, InkSession, Notice, OfflineStore, PageId, PointerSample,
    StaticPages, Stroke, StrokeId, StrokeStyle, UndoCommand,
};
use pollster::block_on;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct World {
    api: MemoryStrokeApi,
    store: Arc<MemoryOfflineStore>,
    connector: ScriptedConnector,
}

impl World {
    fn new() -> Self {
        Self::with_store(MemoryOfflineStore::new())
    }

    fn with_store(store: MemoryOfflineStore) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            api: MemoryStrokeApi::new(),
            store: Arc::new(store),
            connector: ScriptedConnector::new(),
        }
    }

    /// A fresh session over the same server, queue and sockets, as after a reload.
    fn session(&self) -> InkSession {
        InkSession::new(
            InkConfig::default(),
            Arc::new(self.api.clone()),
            self.store.clone(),
            Box::new(self.connector.clone()),
            Arc::new(InlineSpawner),
        )
    }
}

fn draw(session: &mut InkSession, page_id: &PageId, from: (f64, f64), to: (f64, f64)) -> StrokeId {
    let rect = ElementRect::new(0.0, 0.0, 1000.0, 1414.0);
    session.begin_stroke(
        page_id.clone(),
        &PointerSample::new(from.0, from.1, None),
        rect,
        StrokeStyle::default(),
    );
    session.ingest(&PointerSample::new(to.0, to.1, None));
    session.on_animation_frame();
    session.end_stroke().unwrap()
}

fn seed_stroke(id: &str, x: f64, y: f64) -> Stroke {
    Stroke::with_id(
        StrokeId::from(id),
        vec![InkPoint::new(x, y, None), InkPoint::new(x + 4.0, y, None)],
        StrokeStyle::default(),
    )
}

fn ids(strokes: &[Stroke]) -> Vec<String> {
    strokes.iter().map(|s| s.id.as_str().to_string()).collect()
}

#[test]
fn test_single_stroke_undo_redo() {
    let world = World::new();
    let mut session = world.session();
    let p1 = PageId::from("p1");

    let s1 = draw(&mut session, &p1, (10.0, 10.0), (20.0, 20.0));
    assert!(session.saved(&p1).is_empty());
    session.poll(Instant::now());

    let saved = session.saved(&p1).to_vec();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, s1);
    assert_eq!(
        session.history().undo_stack(&p1),
        vec![&UndoCommand::add(p1.clone(), saved[0].clone())]
    );

    assert!(session.undo(&p1));
    assert!(session.saved(&p1).is_empty());
    assert!(world.api.stored(&p1).is_empty());

    assert!(session.redo(&p1));
    assert_eq!(session.saved(&p1), saved.as_slice());
    assert_eq!(world.api.stored(&p1).len(), 1);
    assert!(session.take_notices().is_empty());
}

#[test]
fn test_tick_sends_one_batch_per_page() {
    let world = World::new();
    let mut session = world.session();
    let p1 = PageId::from("p1");
    let p2 = PageId::from("p2");

    let drawn: Vec<StrokeId> = (0..3)
        .map(|i| {
            let y = 100.0 * i as f64;
            draw(&mut session, &p1, (0.0, y), (50.0, y))
        })
        .collect();
    draw(&mut session, &p2, (0.0, 0.0), (5.0, 5.0));
    session.poll(Instant::now());

    assert_eq!(world.api.save_calls(), 2);
    assert!(world.api.calls().contains(&ApiCall::Save {
        page_id: p1.clone(),
        stroke_ids: drawn,
    }));
    assert!(session.pending(&p1).is_empty());
    assert_eq!(session.saved(&p1).len(), 3);
}

#[test]
fn test_failed_save_is_queued_and_kept() {
    let world = World::new();
    world.api.set_mode(ApiMode::Offline);
    let mut session = world.session();
    let p1 = PageId::from("p1");

    draw(&mut session, &p1, (0.0, 0.0), (10.0, 0.0));
    draw(&mut session, &p1, (0.0, 50.0), (10.0, 50.0));
    session.poll(Instant::now());

    assert_eq!(session.saved(&p1).len(), 2);
    let entries = block_on(session.offline_queue().peek_all());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].page_id, p1);
    assert_eq!(ids(&entries[0].strokes), ids(session.saved(&p1)));
    assert!(
        session
            .take_notices()
            .contains(&Notice::QueuedOffline { page_id: p1, strokes: 2 })
    );
}

#[test]
fn test_queue_survives_reload_and_drains() {
    let world = World::new();
    let p1 = PageId::from("p1");
    let now = Instant::now();

    let drawn = {
        world.api.set_mode(ApiMode::Offline);
        let mut session = world.session();
        let id = draw(&mut session, &p1, (0.0, 0.0), (10.0, 0.0));
        session.poll(now);
        id
    };
    assert_eq!(block_on(world.store.count()).unwrap(), 1);

    // Reload while the server is still down: queued strokes still render.
    let mut session = world.session();
    session.watch_current(&StaticPages::new([p1.clone()]), now);
    assert_eq!(ids(session.saved(&p1)), vec![drawn.as_str().to_string()]);

    world.api.set_mode(ApiMode::Online);
    session.poll(now);
    session.poll(now);

    assert_eq!(block_on(session.queued_count()), 0);
    assert_eq!(ids(&world.api.stored(&p1)), vec![drawn.as_str().to_string()]);
    assert_eq!(session.saved(&p1).len(), 1);
}

#[test]
fn test_full_queue_drops_batch_but_keeps_strokes() {
    let world = World::with_store(MemoryOfflineStore::with_quota(16));
    world.api.set_mode(ApiMode::Offline);
    let mut session = world.session();
    let p1 = PageId::from("p1");

    let id = draw(&mut session, &p1, (0.0, 0.0), (10.0, 0.0));
    session.poll(Instant::now());

    assert_eq!(block_on(session.queued_count()), 0);
    assert_eq!(ids(session.saved(&p1)), vec![id.as_str().to_string()]);
    assert!(
        session
            .take_notices()
            .contains(&Notice::QueueWriteDropped { page_id: p1, strokes: 1 })
    );
}

#[test]
fn test_offline_erase_is_not_replayed() {
    let world = World::new();
    world.api.set_mode(ApiMode::Offline);
    let mut session = world.session();
    let p1 = PageId::from("p1");
    let now = Instant::now();

    let kept = draw(&mut session, &p1, (0.0, 0.0), (10.0, 0.0));
    let erased = draw(&mut session, &p1, (0.0, 300.0), (10.0, 300.0));
    session.poll(now);
    session.poll(now);
    assert_eq!(block_on(session.queued_count()), 1);

    assert_eq!(session.erase_at(&p1, 0.0, 300.0, 12.0), Some(erased));
    let entries = block_on(session.offline_queue().peek_all());
    assert_eq!(ids(&entries[0].strokes), vec![kept.as_str().to_string()]);

    world.api.set_mode(ApiMode::Online);
    session.poll(now + Duration::from_secs(3));
    session.poll(now + Duration::from_secs(3));

    assert_eq!(block_on(session.queued_count()), 0);
    assert_eq!(ids(session.saved(&p1)), vec![kept.as_str().to_string()]);
    assert_eq!(ids(&world.api.stored(&p1)), vec![kept.as_str().to_string()]);
}

#[test]
fn test_offline_undo_is_not_replayed() {
    let world = World::new();
    world.api.set_mode(ApiMode::Offline);
    let mut session = world.session();
    let p1 = PageId::from("p1");
    let now = Instant::now();

    let id = draw(&mut session, &p1, (0.0, 0.0), (10.0, 0.0));
    session.poll(now);
    session.poll(now);

    assert!(session.undo(&p1));
    assert!(session.saved(&p1).is_empty());
    assert_eq!(block_on(session.queued_count()), 0);

    world.api.set_mode(ApiMode::Online);
    session.poll(now + Duration::from_secs(3));
    session.poll(now + Duration::from_secs(3));
    assert!(session.saved(&p1).is_empty());
    assert!(world.api.stored(&p1).is_empty());

    assert!(session.redo(&p1));
    assert_eq!(ids(session.saved(&p1)), vec![id.as_str().to_string()]);
    assert_eq!(ids(&world.api.stored(&p1)), vec![id.as_str().to_string()]);
}

#[test]
fn test_rejected_entry_is_discarded() {
    let world = World::new();
    world.api.set_mode(ApiMode::Offline);
    let mut session = world.session();
    let p1 = PageId::from("p1");
    let now = Instant::now();

    draw(&mut session, &p1, (0.0, 0.0), (10.0, 0.0));
    session.poll(now);
    // Settles the failed first drain pass; the retry is due 2s later.
    session.poll(now);
    session.take_notices();

    world.api.set_mode(ApiMode::Status(404));
    session.poll(now + Duration::from_secs(3));
    session.poll(now + Duration::from_secs(3));

    assert_eq!(block_on(session.queued_count()), 0);
    assert_eq!(session.take_notices(), vec![Notice::EntryDiscarded { page_id: p1, strokes: 1 }]);
}

#[test]
fn test_undo_redo_restores_order() {
    let world = World::new();
    let p1 = PageId::from("p1");
    world.api.seed(
        &p1,
        vec![
            seed_stroke("a", 0.0, 0.0),
            seed_stroke("b", 200.0, 0.0),
            seed_stroke("c", 400.0, 0.0),
            seed_stroke("d", 600.0, 0.0),
        ],
    );
    let mut session = world.session();
    session.load_page(&p1);

    assert_eq!(session.erase_at(&p1, 200.0, 0.0, 12.0), Some(StrokeId::from("b")));
    assert_eq!(session.erase_at(&p1, 600.0, 0.0, 12.0), Some(StrokeId::from("d")));
    let e = draw(&mut session, &p1, (100.0, 500.0), (150.0, 500.0));
    session.poll(Instant::now());

    let after = session.saved(&p1).to_vec();
    assert_eq!(ids(&after), vec!["a", "c", e.as_str()]);

    for _ in 0..3 {
        assert!(session.undo(&p1));
    }
    assert_eq!(ids(session.saved(&p1)), vec!["a", "b", "c", "d"]);
    assert!(!session.undo(&p1));

    for _ in 0..3 {
        assert!(session.redo(&p1));
    }
    assert_eq!(session.saved(&p1), after.as_slice());
    assert_eq!(ids(&world.api.stored(&p1)), ids(&after));
}

#[test]
fn test_server_echo_is_not_doubled() {
    let world = World::new();
    let mut session = world.session();
    let p1 = PageId::from("p1");
    let now = Instant::now();

    session.set_view([p1.clone()], now);
    world.connector.push(&p1, SocketEvent::Opened);
    session.poll(now);
    assert_eq!(session.channel_state(&p1), ChannelState::Open);

    let id = draw(&mut session, &p1, (0.0, 0.0), (10.0, 10.0));
    let pending = session.pending(&p1).to_vec();

    // Echo overtakes the tick: the stroke is still pending.
    let echo = serde_json::json!({ "type": "strokes:added", "strokes": pending }).to_string();
    world.connector.push_text(&p1, echo.clone());
    session.poll(now);
    assert!(session.saved(&p1).is_empty());
    assert_eq!(session.pending(&p1).len(), 1);

    session.poll(now + Duration::from_secs(2));
    world.connector.push_text(&p1, echo);
    session.poll(now + Duration::from_secs(2));

    assert_eq!(session.strokes(&p1).count(), 1);
    assert_eq!(session.saved(&p1)[0].id, id);
    assert_eq!(session.index(&p1).map(|index| index.len()), Some(1));
}

#[test]
fn test_reconnect_delay_is_capped_and_reset() {
    let world = World::new();
    let mut session = world.session();
    let p1 = PageId::from("p1");
    let mut now = Instant::now();
    session.set_view([p1.clone()], now);

    let mut last_delay = Duration::ZERO;
    for _ in 0..12 {
        assert!(world.connector.push(&p1, SocketEvent::Closed));
        session.poll(now);
        assert_eq!(session.channel_state(&p1), ChannelState::Closed { will_reconnect: true });

        let at = session.realtime().channel(&p1).and_then(|c| c.reconnect_at()).unwrap();
        last_delay = at - now;
        assert!(last_delay <= Duration::from_secs(30));

        now = at;
        session.poll(now);
        assert_eq!(session.channel_state(&p1), ChannelState::Connecting);
    }
    assert_eq!(last_delay, Duration::from_secs(30));
    assert_eq!(world.connector.connect_count(&p1), 13);

    world.connector.push(&p1, SocketEvent::Opened);
    session.poll(now);
    assert_eq!(session.channel_state(&p1), ChannelState::Open);
    assert_eq!(session.realtime().attempt(&p1), 0);
}

#[test]
fn test_view_switch_flushes_before_unloading() {
    let world = World::new();
    let mut session = world.session();
    let p1 = PageId::from("p1");
    let p2 = PageId::from("p2");
    let now = Instant::now();
    let mut pages = StaticPages::new([p1.clone(), p2.clone()]);

    session.watch_current(&pages, now);
    draw(&mut session, &p1, (0.0, 0.0), (10.0, 10.0));

    assert!(pages.select(&p2));
    session.watch_current(&pages, now);

    assert_eq!(world.api.stored(&p1).len(), 1);
    assert!(session.pending(&p1).is_empty());
    assert!(session.saved(&p1).is_empty());
    assert!(world.connector.is_closed(&p1));
    assert!(!world.connector.is_closed(&p2));

    session.watch_all(&pages, now);
    assert_eq!(session.view().len(), 2);
    assert_eq!(session.saved(&p1).len(), 1);
    assert_eq!(world.connector.connect_count(&p2), 1);
}
