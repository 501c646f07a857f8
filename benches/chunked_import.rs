use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use tempfile::TempDir;
use trajectory_import::cli::{ImportArgs, SourceArgs};
use trajectory_import::import;

/// Ten trips of GPS points, every 97th geometry unreadable.
fn generate_points(rows: usize) -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let csv_path = temp_dir.path().join("points.csv");
    let mut file = File::create(&csv_path).expect("create csv");
    writeln!(file, "point_id,trip_id,timestamp,geometry,speed_limit,road_type").expect("header");
    let per_trip = rows / 10;
    for i in 0..rows {
        let trip = i / per_trip.max(1);
        let step = i % per_trip.max(1);
        let (minute, second) = (step / 60 % 60, step % 60);
        let hour = 8 + step / 3600;
        let geometry = if i % 97 == 50 {
            "POINT (bad)".to_string()
        } else {
            format!("POINT ({:.6} {:.6})", 8.7 + step as f64 * 1e-4, 50.1 + trip as f64 * 1e-2)
        };
        let road_type = if step % 200 < 100 { "primary" } else { "residential" };
        let limit = if step % 7 == 0 { "" } else if road_type == "primary" { "70" } else { "30" };
        writeln!(
            file,
            "{i},{trip},2024-05-06 {hour:02}:{minute:02}:{second:02},{geometry},{limit},{road_type}"
        )
        .expect("row");
    }
    (temp_dir, csv_path)
}

fn import_args(input: &Path, output: &Path, chunk_rows: usize) -> ImportArgs {
    ImportArgs {
        source: SourceArgs {
            format: "geo_points".to_string(),
            input: input.to_path_buf(),
            auxiliary: Vec::new(),
            delimiter: None,
            input_encoding: None,
        },
        output: Some(output.to_path_buf()),
        config: None,
        chunk_rows: Some(chunk_rows),
        output_delimiter: None,
        output_encoding: None,
        accept_corruption: true,
        report: None,
    }
}

fn bench_chunked_import(c: &mut Criterion) {
    let (temp_dir, csv_path) = generate_points(50_000);
    let output = temp_dir.path().join("unified.csv");
    let small = import_args(&csv_path, &output, 5_000);
    let whole = import_args(&csv_path, &output, 50_000);

    let mut group = c.benchmark_group("geo_points_import");
    group.sample_size(10);

    group.bench_function("chunks_of_5000", |b| {
        b.iter_batched(
            || (),
            |_| import::execute(&small).expect("import in chunks"),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("single_chunk", |b| {
        b.iter_batched(
            || (),
            |_| import::execute(&whole).expect("import whole file"),
            BatchSize::SmallInput,
        );
    });

    drop(temp_dir);
    group.finish();
}

criterion_group!(benches, bench_chunked_import);
criterion_main!(benches);
