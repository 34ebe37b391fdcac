fn main() {
    println!("Run `cargo test -p event-compat` to execute event compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use dropkit_protocol::{ChunkProgress, ResumeStatus, ResumeSummary};
    use dropkit_transfer::{
        ChunkUpload, FileSource, FnProvider, ProviderError, ResumeConfig, ResumeCoordinator,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes numbers so that `40` and `40.0` compare equal.
    ///
    /// The UI writes whole percentages as integers; `f64` fields serialize
    /// with a fractional part.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON values.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    /// Collects every object key path (`a.b`, `chunks[].id`) in a value.
    fn key_paths(v: &serde_json::Value, prefix: &str, out: &mut BTreeSet<String>) {
        match v {
            serde_json::Value::Object(map) => {
                for (k, child) in map {
                    let path = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{prefix}.{k}")
                    };
                    out.insert(path.clone());
                    key_paths(child, &path, out);
                }
            }
            serde_json::Value::Array(arr) => {
                for child in arr {
                    key_paths(child, &format!("{prefix}[]"), out);
                }
            }
            _ => {}
        }
    }

    fn keys_of(v: &serde_json::Value) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        key_paths(v, "", &mut out);
        out
    }

    // --- Fixture roundtrips ---

    #[test]
    fn fixture_chunk_progress() {
        let progress: ChunkProgress = roundtrip_test("chunk_progress.json");
        assert_eq!(progress.uploaded_bytes, 2_097_152);
        assert!(progress.chunk_id.ends_with("-chunk-1"));
    }

    #[test]
    fn fixture_resume_summary() {
        let summary: ResumeSummary = roundtrip_test("resume_summary.json");
        assert_eq!(summary.status, ResumeStatus::Paused);
        assert_eq!(summary.chunks.len(), 3);
        assert_eq!(summary.chunks[1].retry_count, 2);
        assert!((summary.percentage() - 1024.0 / 1536.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn fixture_resume_summary_without_mime_type() {
        let summary: ResumeSummary = roundtrip_test("resume_summary_no_mime.json");
        assert!(summary.metadata.mime_type.is_empty());
        assert!((summary.percentage() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fixture_resume_statuses() {
        let statuses: Vec<ResumeStatus> = roundtrip_test("resume_statuses.json");
        assert_eq!(statuses.len(), 5);
        assert!(statuses.iter().filter(|s| s.is_in_flight()).count() == 2);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let result: Result<ResumeStatus, _> = serde_json::from_str("\"queued\"");
        assert!(result.is_err());
    }

    // --- Engine output matches the fixture shapes ---

    #[tokio::test]
    async fn engine_output_has_fixture_shape() {
        let coordinator = ResumeCoordinator::new(ResumeConfig {
            chunk_size: 512,
            retry_attempts: 0,
            ..ResumeConfig::default()
        });
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        coordinator.on_progress(move |p| e.lock().unwrap().push(p.clone()));

        let file = FileSource::from_bytes("photo.jpg", vec![3u8; 1536])
            .with_last_modified(1_700_000_000_000);
        let state = coordinator
            .create_resume_state(&file, "cloudinary")
            .await
            .unwrap();

        // The last chunk is rejected so the summary ends up partially uploaded.
        let provider = FnProvider::new("cloudinary", |chunk: ChunkUpload| async move {
            if chunk.index == 2 {
                Err(ProviderError::Rejected("too large".into()))
            } else {
                Ok(())
            }
        });
        let result = coordinator.resume_upload(&state.file_id, &provider).await;
        assert!(!result.success);

        let summary = coordinator
            .get_resume_state(&state.file_id)
            .unwrap()
            .summary();
        assert_eq!(summary.status, ResumeStatus::Failed);
        assert_eq!(summary.uploaded_size, 1024);
        assert_eq!(
            keys_of(&serde_json::to_value(&summary).unwrap()),
            keys_of(&load_fixture("resume_summary.json"))
        );

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            keys_of(&serde_json::to_value(&events[0]).unwrap()),
            keys_of(&load_fixture("chunk_progress.json"))
        );
    }
}
