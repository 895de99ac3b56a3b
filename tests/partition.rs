use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use descgen::batch::BatchRequest;
use descgen::collections::{Collection, scan};
use descgen::domain::{ChunkStatus, Record};
use descgen::error::DescError;
use descgen::partition::{RequestSettings, partition, read_request_file, write_chunks};
use descgen::store::Store;

fn settings() -> RequestSettings {
    RequestSettings {
        model: "claude-haiku-4-5-20251001".to_string(),
        max_tokens: 120,
    }
}

fn records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| Record::new(&format!("brand-{i:05}"), "", &format!("b{i}.com"), &["retail"]))
        .collect()
}

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Store::new(dir))
}

#[test]
fn twenty_five_thousand_records_make_three_chunks() {
    let all = records(25_000);
    let sizes: Vec<usize> = partition(&all, 10_000)
        .unwrap()
        .iter()
        .map(|slice| slice.len())
        .collect();
    assert_eq!(sizes, vec![10_000, 10_000, 5_000]);
}

#[test]
fn chunks_are_contiguous_and_cover_everything() {
    let all = records(23);
    let slices = partition(&all, 5).unwrap();
    let rejoined: Vec<&Record> = slices.iter().flat_map(|slice| slice.iter()).collect();
    assert_eq!(rejoined.len(), all.len());
    for (original, chunked) in all.iter().zip(rejoined) {
        assert_eq!(original.slug, chunked.slug);
    }
    assert!(slices.iter().all(|slice| !slice.is_empty() && slice.len() <= 5));
}

#[test]
fn request_files_are_byte_identical_across_runs() {
    let (_first_temp, first) = temp_store();
    let (_second_temp, second) = temp_store();
    let all = records(12);

    let a = write_chunks(&first, &all, 5, &settings()).unwrap();
    let b = write_chunks(&second, &all, 5, &settings()).unwrap();
    assert_eq!(a.len(), 3);
    assert_eq!(b.len(), 3);
    for index in 0..3 {
        let left = std::fs::read(first.request_path(index).as_std_path()).unwrap();
        let right = std::fs::read(second.request_path(index).as_std_path()).unwrap();
        assert_eq!(left, right);
    }
}

#[test]
fn written_chunks_start_pending_and_read_back() {
    let (_temp, store) = temp_store();
    let all = records(7);
    let chunks = write_chunks(&store, &all, 4, &settings()).unwrap();

    assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(chunks.iter().map(|c| c.count).collect::<Vec<_>>(), vec![4, 3]);
    assert!(chunks.iter().all(|c| c.status == ChunkStatus::Pending && c.batch_id.is_none()));

    let requests: Vec<BatchRequest> = read_request_file(&chunks[1].file).unwrap();
    let ids: Vec<&str> = requests.iter().map(|r| r.custom_id.as_str()).collect();
    assert_eq!(ids, vec!["brand-00004", "brand-00005", "brand-00006"]);
    assert_eq!(requests[0].params.max_tokens, 120);
    assert!(requests[0].params.messages[0].content.starts_with("brand-00004 (b4.com)"));
}

#[test]
fn broken_request_file_names_the_line() {
    let (_temp, store) = temp_store();
    let path = store.request_path(0);
    std::fs::write(path.as_std_path(), "{\"custom_id\":\"a\"}\n").unwrap();
    let err = read_request_file(&path).unwrap_err();
    assert_matches!(&err, DescError::RequestFile { message, .. } if message.starts_with("line 1"));
}

#[test]
fn scan_is_idempotent() {
    let collections = vec![
        Collection {
            path: Utf8PathBuf::from("data/brands-us.json"),
            market: "US".to_string(),
            records: vec![
                Record::new("acme", "Acme", "acme.com", &["tools"]),
                Record::new("bolt", "Bolt", "bolt.com", &[]).with_description("Bolts."),
            ],
        },
        Collection {
            path: Utf8PathBuf::from("data/brands-de.json"),
            market: "DE".to_string(),
            records: vec![
                Record::new("core", "Core", "core.de", &[]),
                Record::new("acme", "Acme", "acme.de", &[]),
            ],
        },
    ];
    let first = scan(&collections);
    let second = scan(&collections);
    assert_eq!(first.records, second.records);
    let slugs: Vec<&str> = first.records.iter().map(|r| r.slug.as_str()).collect();
    assert_eq!(slugs, vec!["core", "acme"]);
}
