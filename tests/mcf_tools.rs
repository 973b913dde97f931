use statvar_import::counters::Counters;
use statvar_import::mcf::loader::{load_files_concurrently, LoadOptions};
use statvar_import::mcf::merge::MergePolicy;
use statvar_import::mcf::parser::{load_mcf_file, ParseOptions};
use statvar_import::mcf::shard::{reshard_files, ShardOptions};
use statvar_import::mcf::{McfDiffer, McfFilter};
use std::fs;
use std::path::PathBuf;

const LEFT: &str = "Node: dcid:Count_Person\n\
typeOf: dcs:StatisticalVariable\n\
name: \"Population\"\n\
\n\
Node: dcid:Count_Household\n\
typeOf: dcs:StatisticalVariable\n\
\n\
Node: l:obs1\n\
typeOf: dcs:StatVarObservation\n\
variableMeasured: dcid:Count_Person\n\
value: 10\n";

const RIGHT: &str = "Node: dcid:Count_Person\n\
typeOf: dcs:StatisticalVariable\n\
name: \"Total population\"\n\
\n\
Node: dcid:Count_Farm\n\
typeOf: dcs:StatisticalVariable\n\
\n\
Node: l:other_obs\n\
typeOf: dcs:StatVarObservation\n\
variableMeasured: Count_Person\n\
value: 10.0\n";

fn write_files(dir: &std::path::Path) -> (PathBuf, PathBuf) {
    let left = dir.join("left.mcf");
    let right = dir.join("right.mcf");
    fs::write(&left, LEFT).unwrap();
    fs::write(&right, RIGHT).unwrap();
    (left, right)
}

#[test]
fn test_diff_pairs_global_and_local_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let (left, right) = write_files(dir.path());
    let options = ParseOptions::default();
    let left = load_mcf_file(&left, &options).unwrap();
    let right = load_mcf_file(&right, &options).unwrap();

    let diff = McfDiffer::new(Vec::new()).compare(&left, &right);
    let counters = Counters::new();
    diff.record(&counters);

    assert!(diff.has_differences());
    assert_eq!(diff.matched, 1);
    assert!(diff.deleted.contains_key("Count_Household"));
    assert!(diff.added.contains_key("Count_Farm"));
    assert_eq!(diff.modified.len(), 1);
    assert_eq!(diff.modified[0].properties[0].property, "name");
    assert_eq!(diff.modified[0].properties[0].added, vec!["Total population"]);
    assert_eq!(counters.get("nodes-modified"), 1);

    let text = diff.to_text();
    assert!(text.contains("- Node: Count_Household\n"));
    assert!(text.contains("+ name: Total population\n"));

    let ignoring_name = McfDiffer::new(vec!["name".to_string()]).compare(&left, &right);
    assert!(ignoring_name.modified.is_empty());
    assert_eq!(ignoring_name.matched, 2);
}

#[tokio::test]
async fn test_concurrent_load_matches_sequential_order() {
    let dir = tempfile::tempdir().unwrap();
    let (left, right) = write_files(dir.path());
    let counters = Counters::new();
    let options = LoadOptions {
        max_concurrent: 1,
        ..LoadOptions::default()
    };
    let nodes = load_files_concurrently(&[left.clone(), right.clone()], &options, &counters)
        .await
        .unwrap();

    let keys: Vec<&str> = nodes.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec!["Count_Person", "Count_Household", "l:obs1", "Count_Farm", "l:other_obs"]
    );
    assert_eq!(nodes["Count_Person"].get("name").unwrap().len(), 2);
    assert_eq!(counters.get("mcf-nodes-merged"), 1);

    let replace = LoadOptions {
        policy: MergePolicy::Replace,
        ..LoadOptions::default()
    };
    let nodes = load_files_concurrently(&[left, right], &replace, &Counters::new())
        .await
        .unwrap();
    assert_eq!(
        nodes["Count_Person"].first_value("name"),
        Some("\"Total population\"")
    );
}

#[test]
fn test_reshard_is_deterministic_and_complete() {
    let dir = tempfile::tempdir().unwrap();
    let (left, right) = write_files(dir.path());
    let options = ShardOptions {
        num_shards: 3,
        policy: MergePolicy::Append,
        multi_value_properties: Vec::new(),
        sort_properties: false,
    };

    let first_prefix = dir.path().join("first/shard");
    let second_prefix = dir.path().join("second/shard");
    let inputs = vec![left, right];
    let first = reshard_files(&inputs, &first_prefix, &options, &Counters::new()).unwrap();
    let reversed: Vec<PathBuf> = inputs.iter().rev().cloned().collect();
    let counters = Counters::new();
    let second = reshard_files(&reversed, &second_prefix, &options, &counters).unwrap();

    assert_eq!(first.len(), 3);
    assert!(first[0].display().to_string().ends_with("shard-00000-of-00003.mcf"));
    assert_eq!(counters.get("mcf-unique-nodes"), 5);

    let mut total = 0;
    for (a, b) in first.iter().zip(&second) {
        let a_nodes = load_mcf_file(a, &ParseOptions::default()).unwrap();
        let b_nodes = load_mcf_file(b, &ParseOptions::default()).unwrap();
        let a_keys: Vec<&String> = a_nodes.keys().collect();
        let b_keys: Vec<&String> = b_nodes.keys().collect();
        assert_eq!(a_keys, b_keys);
        total += a_nodes.len();
    }
    assert_eq!(total, 5);
}

#[test]
fn test_filter_by_type() {
    let dir = tempfile::tempdir().unwrap();
    let (left, _) = write_files(dir.path());
    let nodes = load_mcf_file(&left, &ParseOptions::default()).unwrap();

    let filter = McfFilter {
        drop_properties: vec!["name".to_string()],
        ..McfFilter::default()
    }
    .with_required(&["typeOf=StatisticalVariable".to_string()]);
    let kept = filter.apply(nodes);

    assert_eq!(kept.len(), 2);
    assert!(!kept.contains_key("l:obs1"));
    assert!(kept["Count_Person"].get("name").is_none());
}

#[tokio::test]
async fn test_keyless_nodes_split_across_files_diff_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let obs_06 = "typeOf: dcs:StatVarObservation\nobservationAbout: dcid:geoId/06\nvalue: 1\n";
    let obs_48 = "typeOf: dcs:StatVarObservation\nobservationAbout: dcid:geoId/48\nvalue: 2\n";
    let a = dir.path().join("a.mcf");
    let b = dir.path().join("b.mcf");
    let both = dir.path().join("both.mcf");
    fs::write(&a, obs_06).unwrap();
    fs::write(&b, obs_48).unwrap();
    fs::write(&both, format!("{}\n{}", obs_06, obs_48)).unwrap();

    let counters = Counters::new();
    let options = LoadOptions::default();
    let split = load_files_concurrently(&[a, b], &options, &counters).await.unwrap();
    let single = load_files_concurrently(&[both], &options, &counters).await.unwrap();
    assert_eq!(split.len(), 2);

    let diff = McfDiffer::new(Vec::new()).compare(&split, &single);
    assert!(!diff.has_differences());
    assert_eq!(diff.matched, 2);
}
