mod common;

use std::path::PathBuf;

use common::{TestWorkspace, camera_recording, clean_geo_points, corrupt_geo_points};
use trajectory_import::{
    cli::SourceArgs,
    column::Column,
    data::Value,
    error::ImportError,
    import::{ImportPrompt, convert_recording},
    session::{ImportSession, SessionOptions},
    table::Table,
};

fn session_with_chunks(chunk_rows: usize) -> ImportSession {
    ImportSession::new(
        Default::default(),
        SessionOptions {
            chunk_rows,
            ..SessionOptions::default()
        },
    )
}

fn source(format: &str, input: PathBuf, auxiliary: Vec<PathBuf>) -> SourceArgs {
    SourceArgs {
        format: format.to_string(),
        input,
        auxiliary,
        delimiter: None,
        input_encoding: None,
    }
}

/// Records what the import asked and answers with a fixed verdict.
struct RecordingPrompt {
    accept: bool,
    reported: Vec<(usize, Vec<String>)>,
    questions: usize,
}

impl RecordingPrompt {
    fn new(accept: bool) -> Self {
        Self {
            accept,
            reported: Vec::new(),
            questions: 0,
        }
    }
}

impl ImportPrompt for RecordingPrompt {
    fn report_warnings(&mut self, chunk: usize, warnings: &[String]) {
        self.reported.push((chunk, warnings.to_vec()));
    }

    fn accept_corruption(&mut self, _warnings: &[String]) -> bool {
        self.questions += 1;
        self.accept
    }
}

fn collect_chunks(session: &mut ImportSession, input: &PathBuf) -> (Vec<Table>, Vec<String>) {
    let mut messages = Vec::new();
    let tables = session
        .import_chunks(input, &mut messages)
        .expect("import chunks")
        .map(|chunk| chunk.expect("chunk converts").expect("chunk is convertible"))
        .collect::<Vec<_>>();
    (tables, messages)
}

#[test]
fn trajectory_tokens_are_stable_across_chunks() {
    let workspace = TestWorkspace::new();
    let input = clean_geo_points(&workspace);
    let mut session = session_with_chunks(2);
    session.open(&[], "geo_points").unwrap();
    let (tables, messages) = collect_chunks(&mut session, &input);
    session.close().unwrap();

    assert!(messages.is_empty(), "{messages:?}");
    assert_eq!(tables.iter().map(Table::row_count).collect::<Vec<_>>(), vec![2, 1]);
    let first = tables[0].column("trajectory_id").unwrap()[0].clone();
    assert!(matches!(first, Some(Value::Guid(_))));
    assert_eq!(tables[1].column("trajectory_id").unwrap()[0], first);

    // Row ids are fresh for every sample.
    let ids = tables
        .iter()
        .flat_map(|table| table.column("id").unwrap().to_vec())
        .collect::<Vec<_>>();
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
}

#[test]
fn tokens_are_not_shared_between_sessions() {
    let workspace = TestWorkspace::new();
    let input = clean_geo_points(&workspace);
    let mut session = ImportSession::default();

    session.open(&[], "geo_points").unwrap();
    let (first, _) = collect_chunks(&mut session, &input);
    session.close().unwrap();
    session.open(&[], "geo_points").unwrap();
    let (second, _) = collect_chunks(&mut session, &input);
    session.close().unwrap();

    assert_ne!(
        first[0].column("trajectory_id").unwrap()[0],
        second[0].column("trajectory_id").unwrap()[0]
    );
}

#[test]
fn every_chunk_carries_all_unified_columns() {
    let workspace = TestWorkspace::new();
    let input = clean_geo_points(&workspace);
    let mut session = session_with_chunks(2);
    session.open(&[], "geo_points").unwrap();
    let (tables, _) = collect_chunks(&mut session, &input);
    session.close().unwrap();

    let expected = Column::ALL.map(Column::name);
    for table in &tables {
        assert_eq!(table.headers(), expected.as_slice());
        let order = table.column("order").unwrap();
        let dense = (0..table.row_count() as i64)
            .map(|i| Some(Value::Integer(i)))
            .collect::<Vec<_>>();
        assert_eq!(order, dense.as_slice());
    }
}

#[test]
fn inaccuracies_name_their_chunk_and_source_rows() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_lines(
        "points.csv",
        &[
            common::GEO_POINTS_HEADER,
            "1,7,2024-05-06 08:00:00,POINT (8.7 50.1)",
            "2,7,2024-05-06 08:00:10,POINT (8.7001 50.1)",
            "3,7,2024-05-06 08:00:20,POINT (8.7002 50.1)",
            "4,7,2024-05-06 08:00:30,not a point",
            "5,7,2024-05-06 08:00:40,POINT (8.7004 50.1)",
        ],
    );
    let mut session = session_with_chunks(3);
    session.open(&[], "geo_points").unwrap();
    let (tables, messages) = collect_chunks(&mut session, &input);
    session.close().unwrap();

    assert_eq!(tables.len(), 2);
    assert_eq!(tables[1].row_count(), 1);
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert!(messages[0].starts_with("Chunk 2 (rows 3-4): "), "{}", messages[0]);
    assert!(messages[0].contains("latitude/longitude"), "{}", messages[0]);
    assert!(messages[0].ends_with(": 0"), "{}", messages[0]);
}

#[test]
fn bicycle_ride_keeps_one_trajectory_and_trims_sensor_rows() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_lines(
        "ride.csv",
        &[
            "lat,lon,timeStamp,accX",
            "50.0,8.0,1714982400000,0.1",
            ",,1714982400500,0.2",
            "50.001,8.0,1714982401000,0.1",
            "50.002,8.0,1714982402000,0.3",
        ],
    );
    let mut session = session_with_chunks(2);
    session.open(&[], "bicycle").unwrap();
    let (tables, messages) = collect_chunks(&mut session, &input);
    session.close().unwrap();

    assert!(messages.is_empty(), "{messages:?}");
    let rows = tables.iter().map(Table::row_count).sum::<usize>();
    assert_eq!(rows, 3);
    let tokens = tables
        .iter()
        .flat_map(|table| table.column("trajectory_id").unwrap().to_vec())
        .collect::<Vec<_>>();
    assert!(tokens.iter().all(|token| *token == tokens[0]));
    assert_eq!(
        tables[0].column("vehicle_type").unwrap()[0],
        Some(Value::String("Bicycle".into()))
    );
    assert_eq!(tables[0].display_row(0)[3], "08:00:00");
}

#[test]
fn camera_recording_converts_through_the_session() {
    let workspace = TestWorkspace::new();
    let (tracks, auxiliary) = camera_recording(&workspace);
    let mut session = session_with_chunks(2);
    session.open(&auxiliary, "tracking_camera").unwrap();
    let (tables, messages) = collect_chunks(&mut session, &tracks);
    session.close().unwrap();

    assert!(messages.is_empty(), "{messages:?}");
    let classes = tables
        .iter()
        .flat_map(|table| table.column("vehicle_type").unwrap().to_vec())
        .collect::<Vec<_>>();
    assert_eq!(
        classes,
        vec![
            Some(Value::String("car".into())),
            Some(Value::String("car".into())),
            Some(Value::String("truck".into())),
        ]
    );
    assert_eq!(tables[0].column("speed_limit").unwrap(), &[None, None]);
    assert_eq!(tables[1].column("road_id").unwrap()[0], Some(Value::String("4:3".into())));
}

#[test]
fn camera_tracks_must_match_the_recording_number() {
    let workspace = TestWorkspace::new();
    let (_, auxiliary) = camera_recording(&workspace);
    let other = workspace.write_lines("02_tracks.csv", &["frame,id,x,y"]);
    let mut session = ImportSession::default();
    session.open(&auxiliary, "tracking_camera").unwrap();
    let mut messages = Vec::new();
    let err = session.import_chunks(&other, &mut messages).err().unwrap();
    assert!(matches!(err, ImportError::Structural(_)));
    assert!(err.to_string().contains("expected 01"), "{err}");
    session.close().unwrap();
}

#[test]
fn missing_required_columns_reject_the_chunk() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_lines("points.csv", &["point_id,trip_id", "1,7"]);
    let mut session = ImportSession::default();
    session.open(&[], "geo_points").unwrap();
    let mut messages = Vec::new();
    let chunks = session
        .import_chunks(&input, &mut messages)
        .unwrap()
        .collect::<Vec<_>>();
    assert_eq!(chunks.len(), 1);
    assert!(matches!(chunks[0], Ok(None)));
    assert!(
        messages[0].ends_with("Source table 'geo_points' lacks required column(s): timestamp, geometry"),
        "{messages:?}"
    );
    session.close().unwrap();
}

#[test]
fn declined_corruption_aborts_and_closes_the_session() {
    let workspace = TestWorkspace::new();
    let input = corrupt_geo_points(&workspace);
    let mut session = ImportSession::default();
    let mut prompt = RecordingPrompt::new(false);
    let mut inaccuracies = Vec::new();
    let mut written = 0usize;
    let err = convert_recording(
        &mut session,
        &source("geo_points", input, Vec::new()),
        &mut prompt,
        &mut inaccuracies,
        |table| {
            written += table.row_count();
            Ok(())
        },
    )
    .unwrap_err();

    assert!(err.to_string().contains("not accepted"), "{err}");
    assert_eq!(written, 0);
    assert_eq!(prompt.questions, 1);
    assert_eq!(prompt.reported.len(), 1);
    assert_eq!(prompt.reported[0].0, 1);
    assert_eq!(inaccuracies.len(), 1);
    assert!(!session.is_open());
}

#[test]
fn accepted_corruption_drops_fatal_rows() {
    let workspace = TestWorkspace::new();
    let input = corrupt_geo_points(&workspace);
    let mut session = ImportSession::default();
    let mut prompt = RecordingPrompt::new(true);
    let mut inaccuracies = Vec::new();
    let mut tables = Vec::new();
    let tally = convert_recording(
        &mut session,
        &source("geo_points", input, Vec::new()),
        &mut prompt,
        &mut inaccuracies,
        |table| {
            tables.push(table);
            Ok(())
        },
    )
    .unwrap();

    assert_eq!(tally.chunks, 1);
    assert_eq!(tally.rows, 2);
    assert_eq!(
        tables[0].column("order").unwrap(),
        &[Some(Value::Integer(0)), Some(Value::Integer(1))]
    );
    assert!(!session.is_open());
}

#[test]
fn clean_recording_never_asks_for_acceptance() {
    let workspace = TestWorkspace::new();
    let input = clean_geo_points(&workspace);
    let mut session = ImportSession::default();
    let mut prompt = RecordingPrompt::new(false);
    let mut inaccuracies = Vec::new();
    let tally = convert_recording(
        &mut session,
        &source("geo_points", input, Vec::new()),
        &mut prompt,
        &mut inaccuracies,
        |_| Ok(()),
    )
    .unwrap();
    assert_eq!(tally.rows, 3);
    assert_eq!(prompt.questions, 0);
    assert!(prompt.reported.is_empty());
}
