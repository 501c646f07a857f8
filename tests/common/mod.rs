#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Joins lines with `\n` and writes them as one file.
    pub fn write_lines(&self, name: &str, lines: &[&str]) -> PathBuf {
        let mut contents = lines.join("\n");
        contents.push('\n');
        self.write(name, &contents)
    }
}

pub const GEO_POINTS_HEADER: &str = "point_id,trip_id,timestamp,geometry";

/// Three clean samples of trip 7, 10 seconds apart.
pub fn clean_geo_points(workspace: &TestWorkspace) -> PathBuf {
    workspace.write_lines(
        "points.csv",
        &[
            GEO_POINTS_HEADER,
            "1,7,2024-05-06 08:00:00,POINT (8.7 50.1)",
            "2,7,2024-05-06 08:00:10,POINT (8.7001 50.1)",
            "3,7,2024-05-06 08:00:20,POINT (8.7002 50.1)",
        ],
    )
}

/// Like [`clean_geo_points`] but the middle sample has no usable geometry.
pub fn corrupt_geo_points(workspace: &TestWorkspace) -> PathBuf {
    workspace.write_lines(
        "points.csv",
        &[
            GEO_POINTS_HEADER,
            "1,7,2024-05-06 08:00:00,POINT (8.7 50.1)",
            "2,7,2024-05-06 08:00:10,POINT (garbage)",
            "3,7,2024-05-06 08:00:20,POINT (8.7002 50.1)",
        ],
    )
}

/// The three files of one tracking-camera recording: two samples of a car
/// followed by one sample of a truck.
pub fn camera_recording(workspace: &TestWorkspace) -> (PathBuf, Vec<PathBuf>) {
    let recording = workspace.write_lines(
        "01_recordingMeta.csv",
        &[
            "id,frameRate,date,startTime,latLocation,lonLocation,speedLimit,locationId",
            "1,25,2024-05-06,08:00:00,50.0,8.0,-1,4",
        ],
    );
    let tracks_meta = workspace.write_lines("01_tracksMeta.csv", &["id,class", "1,car", "2,truck"]);
    let tracks = workspace.write_lines(
        "01_tracks.csv",
        &[
            "frame,id,x,y,xVelocity,yVelocity,xAcceleration,yAcceleration,laneId",
            "0,1,0,0,10,0,-1,0,2",
            "25,1,10,0,9,0,-1,0,2",
            "0,2,0,100,0,5,0,1,3",
        ],
    );
    (tracks, vec![recording, tracks_meta])
}

/// Reads a comma-separated output file into its header and rows.
pub fn read_output(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let text = fs::read_to_string(path).expect("read output");
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .expect("output header")
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|record| {
            record
                .expect("output record")
                .iter()
                .map(str::to_string)
                .collect()
        })
        .collect();
    (headers, rows)
}

/// Values of column `name` in output read by [`read_output`].
pub fn output_column(headers: &[String], rows: &[Vec<String>], name: &str) -> Vec<String> {
    let idx = headers
        .iter()
        .position(|header| header == name)
        .unwrap_or_else(|| panic!("no column {name}"));
    rows.iter().map(|row| row[idx].clone()).collect()
}
