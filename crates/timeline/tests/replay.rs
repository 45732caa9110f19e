//! Replay properties over a realistic two-file session.
use timeline::codec::{decode_compact, encode_compact, CompactLog, EventLog, LEGACY_FORMAT_VERSION};
use timeline::*;

fn main_rs() -> Uri {
    Uri::from("file:///src/main.rs")
}

fn lib_rs() -> Uri {
    Uri::from("file:///src/lib.rs")
}

fn text(s: &str) -> FileDesc {
    FileDesc::Text { text: s.into() }
}

fn caret(line: u32, character: u32) -> Selection {
    Selection::caret(Position::new(line, character))
}

fn show(
    selections: Vec<Selection>,
    visible_range: LineRange,
    just_opened: bool,
    revert_uri: Option<Uri>,
    revert_selections: Option<Vec<Selection>>,
) -> EditorEvent {
    EditorEvent::ShowTextEditor(ShowTextEditor {
        activate: true,
        just_opened,
        selections,
        visible_range,
        revert_uri,
        revert_selections,
        revert_visible_range: None,
        recorder_version: CURRENT_RECORDER_VERSION,
    })
}

/// One event per second touching every event kind.
fn recorded_session() -> EventStore {
    let (a, b) = (main_rs(), lib_rs());
    let insert = TextInsert::at(Position::new(0, 11), " println!(); ");

    let events = vec![
        (a.clone(), EditorEvent::FsCreate(FsCreate { file: text("fn main() {}\n") })),
        (
            a.clone(),
            EditorEvent::OpenTextDocument(OpenTextDocument {
                text: None,
                eol: EndOfLine::Lf,
                language_id: "rust".into(),
            }),
        ),
        (a.clone(), show(vec![caret(0, 0)], LineRange::new(0, 10), false, None, None)),
        (a.clone(), EditorEvent::TextInsert(insert)),
        (
            a.clone(),
            EditorEvent::Select(Select {
                selections: vec![caret(0, 3)],
                revert_selections: vec![caret(0, 0)],
            }),
        ),
        (
            a.clone(),
            EditorEvent::Scroll(Scroll {
                visible_range: LineRange::new(5, 15),
                revert_visible_range: LineRange::new(0, 10),
            }),
        ),
        (b.clone(), EditorEvent::FsCreate(FsCreate { file: text("pub fn lib() {}") })),
        (
            b.clone(),
            show(vec![caret(0, 0)], LineRange::new(0, 1), true, Some(a.clone()), None),
        ),
        (
            b.clone(),
            EditorEvent::TextChange(TextChange {
                changes: vec![ContentChange {
                    range: Range::new(Position::new(0, 0), Position::new(0, 3)),
                    text: String::new(),
                    revert_range: Range::caret(Position::new(0, 0)),
                    revert_text: "pub".into(),
                }],
                update_selection: false,
                revert_selections: None,
            }),
        ),
        (
            b.clone(),
            EditorEvent::CloseTextEditor(CloseTextEditor {
                revert_selections: vec![caret(0, 0)],
                revert_visible_range: LineRange::new(0, 1),
                revert_active: true,
            }),
        ),
        (
            b.clone(),
            EditorEvent::CloseTextDocument(CloseTextDocument {
                revert_text: " fn lib() {}".into(),
                revert_eol: EndOfLine::Lf,
                revert_language_id: String::new(),
            }),
        ),
        (
            b.clone(),
            EditorEvent::OpenTextDocument(OpenTextDocument {
                text: None,
                eol: EndOfLine::Lf,
                language_id: String::new(),
            }),
        ),
        (
            a.clone(),
            EditorEvent::FsChange(FsChange {
                file: text("fn main() { println!(); }\n"),
                revert_file: text("fn main() {}\n"),
            }),
        ),
        (
            a.clone(),
            EditorEvent::UpdateTextDocument(UpdateTextDocument {
                language_id: "rust-script".into(),
                revert_language_id: "rust".into(),
            }),
        ),
        (a.clone(), EditorEvent::Save(Save {})),
        (
            b.clone(),
            EditorEvent::CloseTextDocument(CloseTextDocument {
                revert_text: " fn lib() {}".into(),
                revert_eol: EndOfLine::Lf,
                revert_language_id: String::new(),
            }),
        ),
        (b.clone(), EditorEvent::FsDelete(FsDelete { revert_file: text("pub fn lib() {}") })),
    ];

    let mut store = EventStore::new();
    for (i, (uri, event)) in events.into_iter().enumerate() {
        store.insert(uri, i as f64, event).unwrap();
    }
    store
}

fn projector() -> WorkspaceProjector {
    WorkspaceProjector::new(InMemoryStepper::default())
}

#[test]
fn test_session_projects_expected_state() {
    let store = recorded_session();
    let mut projector = projector();
    projector.seek(&store, 5.0).unwrap();

    let wt = projector.worktree();
    let doc = wt.document(&main_rs()).unwrap();
    assert_eq!(doc.text(), "fn main() { println!(); }\n");
    let editor = wt.editor(&main_rs()).unwrap();
    assert_eq!(editor.selections, vec![caret(0, 3)]);
    assert_eq!(editor.visible_range, LineRange::new(5, 15));
    assert_eq!(wt.active_editor(), Some(&main_rs()));

    projector.seek(&store, 11.0).unwrap();
    let wt = projector.worktree();
    assert_eq!(wt.document(&lib_rs()).unwrap().text(), " fn lib() {}");
    assert!(wt.active_editor().is_none());

    projector.seek(&store, 100.0).unwrap();
    let item = projector.worktree().get(&lib_rs()).unwrap();
    assert!(item.file.is_none());
    assert_eq!(item.closed_dirty().map(|d| d.text()), Some(" fn lib() {}".into()));
}

#[test]
fn test_every_event_is_invertible() {
    let store = recorded_session();
    for index in 0..store.len() {
        let before = index.checked_sub(1);
        let mut projector = projector();
        projector.seek_to_index(&store, before).unwrap();
        let start = projector.worktree().clone();

        projector.seek_to_index(&store, Some(index)).unwrap();
        let after = projector.worktree().clone();

        projector.seek_to_index(&store, before).unwrap();
        assert_eq!(projector.worktree(), &start, "backward of event {index}");

        projector.seek_to_index(&store, Some(index)).unwrap();
        assert_eq!(projector.worktree(), &after, "forward of event {index}");
    }
}

#[test]
fn test_seek_is_path_independent() {
    let store = recorded_session();
    let detours = [16.0, 3.0, 9.5, 0.0, -1.0, 12.0];
    let mut wandering = projector();
    for step in 0..=36 {
        let target = step as f64 * 0.5;
        let mut direct = projector();
        direct.seek(&store, target).unwrap();

        wandering.seek(&store, detours[step % detours.len()]).unwrap();
        wandering.seek(&store, target).unwrap();
        assert_eq!(wandering.worktree(), direct.worktree(), "clock {target}");
        assert_eq!(wandering.event_index(), direct.event_index());
    }
}

#[test]
fn test_seek_plan_scenario() {
    let uri = Uri::from("R");
    let mut store = EventStore::new();
    store
        .insert(uri.clone(), 0.0, EditorEvent::FsCreate(FsCreate { file: text("") }))
        .unwrap();
    for c in 1..=5 {
        store
            .insert(
                uri.clone(),
                c as f64,
                EditorEvent::FsChange(FsChange {
                    file: text(&c.to_string()),
                    revert_file: text(""),
                }),
            )
            .unwrap();
    }

    let mut projector = projector();
    let plan = projector.compute_seek_plan(&store, 2.5);
    assert_eq!(plan.direction, Direction::Forward);
    assert_eq!(
        plan.steps.iter().map(|s| s.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    projector.seek(&store, 5.0).unwrap();
    let plan = projector.compute_seek_plan(&store, 1.0);
    assert_eq!(plan.direction, Direction::Backward);
    assert_eq!(
        plan.steps.iter().map(|s| s.index).collect::<Vec<_>>(),
        vec![5, 4, 3, 2]
    );
    assert_eq!(plan.steps.last().and_then(|s| s.index_after), Some(1));
}

#[test]
fn test_legacy_show_editor_reverts_other_editor() {
    let (a, b) = (main_rs(), lib_rs());
    let mut store = EventStore::new();
    store
        .insert(
            a.clone(),
            0.0,
            EditorEvent::OpenTextDocument(OpenTextDocument {
                text: Some("a".into()),
                eol: EndOfLine::Lf,
                language_id: String::new(),
            }),
        )
        .unwrap();
    store
        .insert(a.clone(), 1.0, show(vec![caret(0, 0)], LineRange::new(0, 1), false, None, None))
        .unwrap();
    store
        .insert(
            b.clone(),
            2.0,
            EditorEvent::OpenTextDocument(OpenTextDocument {
                text: Some("b".into()),
                eol: EndOfLine::Lf,
                language_id: String::new(),
            }),
        )
        .unwrap();
    store
        .insert(
            a.clone(),
            3.0,
            EditorEvent::Select(Select {
                selections: vec![caret(0, 1)],
                revert_selections: vec![caret(0, 0)],
            }),
        )
        .unwrap();
    store
        .insert(
            b.clone(),
            4.0,
            EditorEvent::ShowTextEditor(ShowTextEditor {
                activate: true,
                just_opened: false,
                selections: vec![caret(0, 1)],
                visible_range: LineRange::new(0, 1),
                revert_uri: Some(a.clone()),
                revert_selections: Some(vec![caret(0, 0)]),
                revert_visible_range: Some(LineRange::new(0, 1)),
                recorder_version: 1,
            }),
        )
        .unwrap();

    let mut projector = projector();
    projector.seek(&store, 4.0).unwrap();
    assert_eq!(projector.worktree().active_editor(), Some(&b));

    projector.seek(&store, 3.0).unwrap();
    let wt = projector.worktree();
    assert_eq!(wt.active_editor(), Some(&a));
    assert_eq!(wt.editor(&a).unwrap().selections, vec![caret(0, 0)]);
    assert!(wt.editor(&b).is_some());
}

#[test]
fn test_compact_round_trip_across_versions() {
    let mut session = Session::new();
    session.store = recorded_session();
    session.duration = 20.0;
    session
        .tracks
        .push(RangedTrack::audio("voice.ogg", ClockRange::new(0.0, 20.0)));

    for version in [LEGACY_FORMAT_VERSION, codec::CURRENT_FORMAT_VERSION] {
        let mut log = session.to_log();
        log.format_version = version;
        let json = encode_compact(&log).to_json_string().unwrap();
        let decoded = decode_compact(&CompactLog::from_json_str(&json).unwrap()).unwrap();
        let restored = Session::from_log(decoded).unwrap();

        assert_eq!(restored.store.len(), session.store.len());
        for (x, y) in restored.store.iter().zip(session.store.iter()) {
            assert_eq!(x.uri, y.uri);
            assert_eq!(x.event.kind(), y.event.kind());
            assert!((x.clock - y.clock).abs() < 0.1);
        }
        assert_eq!(restored.tracks, session.tracks);
        assert_eq!(restored.format_version, version);
    }

    let json = session.to_log().to_json_string().unwrap();
    let full = EventLog::from_json_str(&json).unwrap();
    assert_eq!(full, session.to_log());
}

#[test]
fn test_speed_change_scenario() {
    let mut store = EventStore::new();
    for clock in [5.0, 15.0, 25.0] {
        store.insert(Uri::from("R"), clock, EditorEvent::Save(Save {})).unwrap();
    }
    warp::change_speed(&mut store, &mut [], &ClockRange::new(10.0, 20.0), 2.0).unwrap();
    let clocks: Vec<Clock> = store.iter().map(|e| e.clock).collect();
    assert_eq!(clocks, vec![5.0, 12.5, 20.0]);
    for i in 0..store.len() {
        assert!(store.index_after_clock(store.at(i).unwrap().clock) <= i + 1);
    }
}

#[test]
fn test_selection_updating_edits_restore_prior_selections() {
    let uri = main_rs();
    let span = |a: (u32, u32), b: (u32, u32)| Selection {
        anchor: Position::new(a.0, a.1),
        active: Position::new(b.0, b.1),
    };
    let multi = vec![span((0, 0), (0, 2)), span((1, 1), (1, 3))];
    let insert = TextInsert {
        update_selection: true,
        revert_selections: Some(multi.clone()),
        ..TextInsert::at(Position::new(0, 0), "xyz")
    };
    let events = vec![
        EditorEvent::FsCreate(FsCreate { file: text("ab\ncdef\n") }),
        EditorEvent::OpenTextDocument(OpenTextDocument {
            text: None,
            eol: EndOfLine::Lf,
            language_id: "rust".into(),
        }),
        show(multi.clone(), LineRange::new(0, 2), false, None, None),
        EditorEvent::TextInsert(insert),
        EditorEvent::TextChange(TextChange {
            changes: vec![ContentChange {
                range: Range::new(Position::new(1, 0), Position::new(1, 1)),
                text: "Z".into(),
                revert_range: Range::new(Position::new(1, 0), Position::new(1, 1)),
                revert_text: "c".into(),
            }],
            update_selection: true,
            revert_selections: Some(vec![caret(0, 3)]),
        }),
    ];
    let mut store = EventStore::new();
    for (i, event) in events.into_iter().enumerate() {
        store.insert(uri.clone(), i as f64, event).unwrap();
    }

    let mut projector = projector();
    projector.seek(&store, 3.0).unwrap();
    assert_eq!(projector.worktree().editor(&uri).unwrap().selections, vec![caret(0, 3)]);

    projector.seek(&store, 4.0).unwrap();
    let wt = projector.worktree();
    assert_eq!(wt.document(&uri).unwrap().text(), "xyzab\nZdef\n");
    assert_eq!(wt.editor(&uri).unwrap().selections, vec![caret(1, 1)]);

    projector.seek(&store, 3.0).unwrap();
    assert_eq!(projector.worktree().editor(&uri).unwrap().selections, vec![caret(0, 3)]);

    projector.seek(&store, 2.5).unwrap();
    let wt = projector.worktree();
    assert_eq!(wt.document(&uri).unwrap().text(), "ab\ncdef\n");
    assert_eq!(wt.editor(&uri).unwrap().selections, multi);
}
