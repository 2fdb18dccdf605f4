use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::TempDir;

/// Outline JSON titled "Test Novel" with chapters "Part 1" through "Part k".
pub fn outline_value(k: usize) -> Value {
    let chapters: Vec<Value> = (1..=k)
        .map(|n| {
            json!({
                "number": n,
                "name": format!("Part {}", n),
                "plot": format!("Plot of part {}", n),
            })
        })
        .collect();
    json!({
        "title": "Test Novel",
        "synopsis": "A test synopsis.",
        "chapters": chapters,
    })
}

/// Write `contents` to `name` inside a fresh temp dir.
///
/// Keep the returned `TempDir` alive for as long as the file is used.
pub fn temp_file(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}
