//! Integration tests for Quarry
//!
//! These tests drive column stacks end to end through the public API: the
//! factory, the dynamic column contract and the binary form.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tempfile::TempDir;
use uuid::Uuid;

use quarry_column::{
    ByteBlock, ByteBlockColumn, Column, ColumnDetails, ColumnFactory, DiagnosticCode, DynColumn,
    ExecutionDetails, FastAddSortedColumn, RoaringBitmap, SortedColumn, ValueColumn,
    VerificationLevel,
};
use quarry_common::config::{SortedConfig, StorageConfig};
use quarry_common::{Config, LocalId, Operator, Value};

/// Test helper to build a column from a descriptor
fn create_column(name: &str, descriptor: &str) -> Box<dyn DynColumn> {
    ColumnFactory::default()
        .build(&ColumnDetails::new(name, descriptor))
        .expect("Failed to build column")
}

/// Test helper to run one predicate and collect matching ids
fn query(column: &dyn DynColumn, op: Operator, value: Value) -> (Vec<u32>, ExecutionDetails) {
    let mut result = RoaringBitmap::new();
    let mut details = ExecutionDetails::new();
    column
        .where_matches(op, &value, &mut result, &mut details)
        .expect("Query failed");
    (result.iter().collect(), details)
}

/// Test helper to write a column to a file and read it into a fresh stack
fn reload(column: &dyn DynColumn, descriptor: &str, dir: &TempDir) -> Box<dyn DynColumn> {
    let path = dir.path().join(format!("{}.col", column.name()));
    {
        let mut writer = BufWriter::new(File::create(&path).expect("Failed to create file"));
        column.write_binary(&mut writer).expect("Failed to write column");
        writer.flush().expect("Failed to flush");
    }

    let mut restored = create_column(column.name(), descriptor);
    let mut reader = BufReader::new(File::open(&path).expect("Failed to open file"));
    restored.read_binary(&mut reader).expect("Failed to read column");
    restored
}

fn assert_consistent(column: &dyn DynColumn) {
    let mut details = ExecutionDetails::new();
    column.verify_consistency(VerificationLevel::Full, &mut details);
    assert!(details.succeeded(), "{:?}", details.errors());
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[test]
fn test_byte_block_set_get_truncate() {
    let mut column = ByteBlockColumn::new("title", ByteBlock::default());
    column.set(0, "alpha".into()).unwrap();
    column.set(1, "beta".into()).unwrap();
    column.set(2, "gamma".into()).unwrap();
    assert_eq!(column.get(1).unwrap(), ByteBlock::from("beta"));

    column.set_size(2).unwrap();
    let values = column.get_many(&[0, 1]).unwrap();
    assert_eq!(values, vec![ByteBlock::from("alpha"), ByteBlock::from("beta")]);
    assert!(column.get(2).is_err());
}

#[test]
fn test_sorted_integers_range_query() {
    let mut column = SortedColumn::new(Box::new(ValueColumn::new("n", 0i32))).unwrap();
    column.set(0, 5).unwrap();
    column.set(1, 1).unwrap();
    column.set(2, 3).unwrap();
    assert_eq!(column.sort_order().unwrap(), &[1, 2, 0]);

    let mut result = RoaringBitmap::new();
    let mut details = ExecutionDetails::new();
    column
        .where_matches(Operator::GreaterThan, &3, &mut result, &mut details)
        .unwrap();
    assert_eq!(result.iter().collect::<Vec<_>>(), vec![0]);
}

#[test]
fn test_html_descriptor_token_queries() {
    let descriptor = "Indexed[Html]:Sorted:string";
    let mut column = create_column("body", descriptor);
    assert_eq!(column.descriptor(), descriptor);

    column
        .set(0, &Value::from("<p>Hello <b>World</b> &amp; friends</p>"))
        .unwrap();
    column.set(1, &Value::from("<div>worldly matters</div>")).unwrap();

    let (hits, details) = query(column.as_ref(), Operator::MatchesExact, Value::from("world"));
    assert_eq!(hits, vec![0]);
    assert!(details.succeeded());

    let (hits, _) = query(column.as_ref(), Operator::MatchesExact, Value::from("orld"));
    assert!(hits.is_empty());
    let (hits, _) = query(column.as_ref(), Operator::MatchesExact, Value::from("amp"));
    assert!(hits.is_empty());
    let (hits, _) = query(column.as_ref(), Operator::MatchesExact, Value::from("div"));
    assert!(hits.is_empty());

    let (hits, _) = query(column.as_ref(), Operator::Matches, Value::from("world"));
    assert_eq!(hits, vec![0, 1]);
}

// ============================================================================
// Round Trip Tests
// ============================================================================

#[test]
fn test_round_trip_every_core_type() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let when = |secs: i64| Value::DateTime(Utc.timestamp_opt(secs, 0).unwrap());

    let cases: Vec<(&str, Vec<Value>)> = vec![
        ("bool", vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)]),
        ("byte", vec![Value::UInt8(9), Value::UInt8(0), Value::UInt8(255)]),
        ("short", vec![Value::Int16(-3), Value::Int16(300), Value::Int16(0)]),
        ("ushort", vec![Value::UInt16(40_000), Value::UInt16(1), Value::UInt16(7)]),
        ("int", vec![Value::Int32(5), Value::Int32(1), Value::Int32(3)]),
        ("uint", vec![Value::UInt32(8), Value::UInt32(8), Value::UInt32(2)]),
        ("long", vec![Value::Int64(-1), Value::Int64(i64::MAX), Value::Int64(0)]),
        ("ulong", vec![Value::UInt64(u64::MAX), Value::UInt64(0), Value::UInt64(12)]),
        ("float", vec![Value::Float32(1.5), Value::Float32(-0.25), Value::Float32(9.0)]),
        ("double", vec![Value::Float64(2.5), Value::Float64(-8.0), Value::Float64(0.125)]),
        ("datetime", vec![when(1_700_000_000), when(0), when(86_400)]),
        (
            "guid",
            vec![
                Value::Guid(Uuid::from_u128(3)),
                Value::Guid(Uuid::from_u128(1)),
                Value::Guid(Uuid::from_u128(2)),
            ],
        ),
        (
            "string",
            vec![Value::from("delta"), Value::from(""), Value::from("alpha beta")],
        ),
        (
            "stringset",
            vec![Value::from("red;green"), Value::from("blue"), Value::from("green")],
        ),
        (
            "blob",
            vec![
                Value::Bytes(vec![0, 159, 146, 150]),
                Value::Bytes(vec![0xff]),
                Value::Bytes(vec![0xfe, 0x01]),
            ],
        ),
        ("FastAddSorted:long", vec![Value::Int64(30), Value::Int64(10), Value::Int64(20)]),
    ];

    for (descriptor, values) in cases {
        let mut column = create_column(descriptor.replace(':', "_").as_str(), descriptor);
        for (lid, value) in values.iter().enumerate() {
            column.set(lid as LocalId, value).unwrap();
        }
        column.commit().unwrap();

        let restored = reload(column.as_ref(), descriptor, &dir);
        assert_eq!(restored.count(), values.len(), "{}", descriptor);
        for (lid, value) in values.iter().enumerate() {
            assert_eq!(&restored.get(lid as LocalId).unwrap(), value, "{}", descriptor);
        }
        assert_eq!(restored.sort_order(), column.sort_order(), "{}", descriptor);
        assert_consistent(restored.as_ref());
    }
}

#[test]
fn test_round_trip_after_heavy_rewrites() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut column = create_column("notes", "string");
    column.set_size(64).unwrap();
    for round in 0..5usize {
        for lid in 0..64usize {
            let text = format!("note {} revision {} {}", lid, round, "x".repeat((lid * 37 + round) % 90));
            column.set(lid as LocalId, &Value::String(text)).unwrap();
        }
    }
    column.set(3, &Value::String("y".repeat(6000))).unwrap();

    let restored = reload(column.as_ref(), "string", &dir);
    for lid in 0..64u16 {
        assert_eq!(restored.get(lid).unwrap(), column.get(lid).unwrap());
    }
    let (hits, _) = query(restored.as_ref(), Operator::MatchesExact, Value::from("revision 4"));
    assert_eq!(hits.len(), 63);
    assert_consistent(restored.as_ref());
}

#[test]
fn test_truncated_stream_is_hard_error() {
    let mut column = create_column("n", "int");
    column.set(0, &Value::Int32(1)).unwrap();
    let mut buf = Vec::new();
    column.write_binary(&mut buf).unwrap();
    buf.pop();

    let mut restored = create_column("n", "int");
    let err = restored.read_binary(&mut buf.as_slice()).unwrap_err();
    assert!(err.is_corruption());
}

// ============================================================================
// Factory And Configuration Tests
// ============================================================================

#[test]
fn test_factory_from_toml_config() {
    let config = Config::from_toml_str(
        r#"
        [storage.byte_block]
        huge_value_threshold = 32
        initial_batch_size = 64
        max_batch_size = 128

        [storage.sorted]
        verify_on_commit = true
        "#,
    )
    .unwrap();
    assert_eq!(config.storage.byte_block.compaction_waste_percent, 20);

    let factory = ColumnFactory::new(config.storage).unwrap();
    let mut column = factory
        .build(&ColumnDetails::new("doc", "bare:string"))
        .unwrap();
    column.set(0, &Value::String("z".repeat(40))).unwrap();
    column.set(1, &Value::from("small")).unwrap();
    assert_eq!(column.get(0).unwrap(), Value::String("z".repeat(40)));
    assert_consistent(column.as_ref());
}

#[test]
fn test_factory_rejects_oversized_threshold() {
    let mut storage = StorageConfig::default();
    storage.byte_block.huge_value_threshold = 100_000;
    storage.byte_block.max_batch_size = 256 * 1024;
    let err = ColumnFactory::new(storage).err().unwrap();
    assert!(matches!(err, quarry_common::Error::Config(_)));
}

#[test]
fn test_factory_rejects_bad_descriptors() {
    let factory = ColumnFactory::new(StorageConfig::default()).unwrap();
    for descriptor in ["money", "Indexed[Xml]:string", "Indexed:int", "Sorted", "Heap:int"] {
        let result = factory.build(&ColumnDetails::new("c", descriptor));
        assert!(result.is_err(), "{} should fail", descriptor);
    }
}

#[test]
fn test_unchanged_value_skips_write() {
    let mut column = create_column("tag", "string");
    column.set(0, &Value::from("same text")).unwrap();
    column.set(0, &Value::from("same text")).unwrap();
    column.set(0, &Value::Null).unwrap();
    assert_eq!(column.get(0).unwrap(), Value::from(""));
    let (hits, _) = query(column.as_ref(), Operator::MatchesExact, Value::from("same"));
    assert!(hits.is_empty());
}

#[test]
fn test_soft_failures_reach_diagnostics() {
    let mut column = create_column("n", "bare:int");
    column.set(0, &Value::Int32(4)).unwrap();

    let (hits, details) = query(column.as_ref(), Operator::Contains, Value::Int32(4));
    assert!(hits.is_empty());
    assert!(details.has(DiagnosticCode::OperatorNotSupported));

    let (hits, details) = query(column.as_ref(), Operator::Equals, Value::from("four"));
    assert!(hits.is_empty());
    assert!(details.has(DiagnosticCode::ConversionFailed));

    let mut details = ExecutionDetails::new();
    column.verify_count(3, &mut details);
    assert!(details.has(DiagnosticCode::ColumnShortOfExpected));
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_fast_add_commit_matches_sorted(values in prop::collection::vec(any::<i16>(), 0..200)) {
        let mut fast = FastAddSortedColumn::new(
            Box::new(ValueColumn::new("v", 0i16)),
            SortedConfig::default(),
        )
        .unwrap();
        let mut sorted = SortedColumn::new(Box::new(ValueColumn::new("v", 0i16))).unwrap();
        for (lid, v) in values.iter().enumerate() {
            fast.set(lid as LocalId, *v).unwrap();
            sorted.set(lid as LocalId, *v).unwrap();
        }
        fast.commit().unwrap();
        prop_assert_eq!(fast.sort_order(), sorted.sort_order());
    }

    #[test]
    fn prop_word_index_tracks_current_values(
        writes in prop::collection::vec((0u16..16, prop::collection::vec(0usize..6, 0..4)), 1..80)
    ) {
        const VOCABULARY: [&str; 6] = ["ant", "bee", "cat", "dog", "eel", "fox"];

        let mut column = create_column("words", "string");
        column.set_size(16).unwrap();
        let mut current: Vec<Vec<usize>> = vec![Vec::new(); 16];
        for (lid, words) in writes {
            let text: Vec<&str> = words.iter().map(|&w| VOCABULARY[w]).collect();
            column.set(lid, &Value::String(text.join(" "))).unwrap();
            current[lid as usize] = words;
        }

        for (w, word) in VOCABULARY.iter().enumerate() {
            let expected: Vec<u32> = current
                .iter()
                .enumerate()
                .filter(|(_, words)| words.contains(&w))
                .map(|(lid, _)| lid as u32)
                .collect();
            let (hits, _) = query(column.as_ref(), Operator::MatchesExact, Value::from(*word));
            prop_assert_eq!(&hits, &expected);

            // Vocabulary words differ in their first letter
            let (hits, _) = query(column.as_ref(), Operator::Matches, Value::from(&word[..2]));
            prop_assert_eq!(hits, expected);
        }
    }
}
