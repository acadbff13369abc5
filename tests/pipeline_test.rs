//! End-to-end run of the batch stages over a temporary artifact directory,
//! then the read side over the same files.

use std::collections::BTreeSet;
use std::path::Path;

use paper_topics::config::PipelineConfig;
use paper_topics::models::{UNCATEGORIZED_ID, UNCATEGORIZED_NAME};
use paper_topics::pipeline::Pipeline;
use paper_topics::query::{ArticleQuery, AssociationQuery, Catalog};
use paper_topics::storage::json::{read_records_file, JsonArtifactStore};
use paper_topics::storage::{Artifact, ArtifactStore};
use paper_topics::Record;
use tempfile::TempDir;

const TOPICS: [(&str, &str); 3] = [
    (
        "bone",
        "Microgravity exposure causes bone loss and reduced bone mineral density in astronauts",
    ),
    (
        "plant",
        "Plant roots show altered growth and gravitropism aboard orbital greenhouse hardware",
    ),
    (
        "muscle",
        "Skeletal muscle atrophy and fiber weakness develop during long duration missions",
    ),
];

fn raw_records() -> Vec<Record> {
    let mut records = Vec::new();
    for i in 0..8 {
        for (topic, text) in TOPICS {
            records.push(Record::new(
                format!("https://example.org/{topic}/{i}"),
                format!("{topic} study {i}"),
                format!("{text}. Cohort {i} replicate."),
            ));
        }
    }
    // Identical duplicate row, collapsed by preprocessing.
    records.push(records[0].clone());
    records
}

async fn write_input(dir: &Path, records: &[Record]) -> std::path::PathBuf {
    let path = dir.join("articles.json");
    let json = serde_json::to_vec_pretty(records).unwrap();
    tokio::fs::write(&path, json).await.unwrap();
    path
}

fn config(data_dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::from_toml_str(
        r#"
        [coarse]
        k = 3

        [consolidation]
        start_id = 100
        targets = { "0" = 2, "1" = 2, "2" = 2 }

        [labeling]
        keywords = 5
        titles = 3

        [associations]
        min_support = 0.3
        min_confidence = 0.6
        max_len = 2

        [evaluation]
        k_min = 2
        k_max = 5
        "#,
    )
    .unwrap();
    config.paths.data_dir = data_dir.to_path_buf();
    config
}

#[tokio::test]
async fn test_pipeline_writes_every_artifact() {
    let tmp = TempDir::new().unwrap();
    let input = write_input(tmp.path(), &raw_records()).await;
    let data_dir = tmp.path().join("artifacts");

    let store = JsonArtifactStore::open(&data_dir).await.unwrap();
    let mut pipeline = Pipeline::new(store, config(&data_dir));

    let raw = read_records_file(&input).await.unwrap();
    assert_eq!(raw.len(), 25);

    let summary = pipeline.preprocess(raw).await.unwrap();
    assert_eq!(summary.records, 24);
    assert_eq!(summary.duplicates.surplus_rows(), 1);
    assert!(!summary.duplicates.has_divergent());

    let trained = pipeline.train().await.unwrap();
    assert_eq!(trained.coarse_sizes.iter().sum::<usize>(), 24);
    assert!(trained.vocabulary > 0);

    let consolidation = pipeline.consolidate().await.unwrap();
    assert_eq!(consolidation.unassigned(), 0);
    assert_eq!(consolidation.next_id, 106);

    let labels = pipeline.label(|_, _| {}).await.unwrap();
    assert!(!labels.is_empty());
    for (id, label) in labels.iter() {
        assert!((100..106).contains(&id));
        assert_eq!(label.keywords.len(), 5);
        assert!(label.sample_titles.len() <= 3);
    }

    for artifact in [
        Artifact::Records,
        Artifact::Model,
        Artifact::CoarseAssignments,
        Artifact::FinalAssignments,
        Artifact::Labels,
        Artifact::Rules,
    ] {
        assert!(pipeline.store().exists(artifact).await.unwrap(), "{artifact:?} missing");
        assert!(data_dir.join(artifact.file_name()).is_file());
    }

    let html = pipeline.report().await.unwrap();
    assert!(html.contains("Cluster report"));
    assert!(!html.contains(UNCATEGORIZED_NAME));

    let evaluation = pipeline.evaluate().await.unwrap();
    assert!(evaluation.silhouette.is_some());
    let ks: Vec<usize> = evaluation.inertia.iter().map(|(k, _)| *k).collect();
    assert_eq!(ks, vec![2, 3, 4, 5]);
}

#[tokio::test]
async fn test_catalog_serves_pipeline_output() {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().join("artifacts");
    let store = JsonArtifactStore::open(&data_dir).await.unwrap();
    let mut pipeline = Pipeline::new(store, config(&data_dir));
    pipeline.run(raw_records(), |_, _| {}).await.unwrap();

    // Reopen from disk, as the server does.
    let store = JsonArtifactStore::open(&data_dir).await.unwrap();
    let catalog = Catalog::load(&store).await.unwrap();
    assert_eq!(catalog.article_count(), 24);

    let clusters = catalog.list_clusters();
    let ids: Vec<i64> = clusters.iter().map(|c| c.id.parse().unwrap()).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert_eq!(clusters.iter().map(|c| c.article_count).sum::<usize>(), 24);

    let all = catalog
        .list_articles(&ArticleQuery {
            limit: 100,
            ..ArticleQuery::default()
        })
        .unwrap();
    assert_eq!(all.total_results, 24);
    assert!(all.items.iter().all(|a| a.final_cluster != UNCATEGORIZED_ID));

    let bone = catalog
        .list_articles(&ArticleQuery {
            search: Some("BONE MINERAL".to_string()),
            limit: 100,
            ..ArticleQuery::default()
        })
        .unwrap();
    assert_eq!(bone.total_results, 8);

    let first = &clusters[0];
    let in_first = catalog
        .list_articles(&ArticleQuery {
            cluster_id: Some(first.id.clone()),
            limit: 100,
            ..ArticleQuery::default()
        })
        .unwrap();
    assert_eq!(in_first.total_results, first.article_count);
    assert!(in_first.items.iter().all(|a| a.cluster_name == first.name));

    let rules = catalog.list_associations(&AssociationQuery::default()).unwrap();
    assert!(rules.items.iter().all(|r| r.confidence >= 0.5));
    let lifts: Vec<f64> = rules.items.iter().map(|r| r.lift).collect();
    assert!(lifts.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_relabel_is_reproducible_from_persisted_model() {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().join("artifacts");
    let store = JsonArtifactStore::open(&data_dir).await.unwrap();
    let mut pipeline = Pipeline::new(store, config(&data_dir));
    let first = pipeline.run(raw_records(), |_, _| {}).await.unwrap();

    let store = JsonArtifactStore::open(&data_dir).await.unwrap();
    let mut again = Pipeline::new(store, config(&data_dir));
    let finals_before = again.store().load_final().await.unwrap();
    again.consolidate().await.unwrap();
    let second = again.label(|_, _| {}).await.unwrap();

    assert_eq!(again.store().load_final().await.unwrap(), finals_before);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_final_assignments_serve_as_uncategorized() {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().join("artifacts");
    let store = JsonArtifactStore::open(&data_dir).await.unwrap();
    let mut pipeline = Pipeline::new(store, config(&data_dir));
    pipeline.preprocess(raw_records()).await.unwrap();

    let catalog = Catalog::load(pipeline.store()).await.unwrap();
    assert!(catalog.list_clusters().is_empty());
    let page = catalog.list_articles(&ArticleQuery::default()).unwrap();
    assert_eq!(page.total_results, 24);
    assert_eq!(page.items.len(), 20);
    let names: BTreeSet<&str> = page.items.iter().map(|a| a.cluster_name.as_str()).collect();
    assert_eq!(names, BTreeSet::from([UNCATEGORIZED_NAME]));
    assert_eq!(catalog.cluster_of("https://example.org/bone/0"), UNCATEGORIZED_ID);
}
