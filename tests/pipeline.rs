//! End-to-end pipeline tests against a scripted phpBB-style forum.

use std::collections::BTreeSet;

use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use forum_corpus::archive::{ChunkArchive, ShardReader, TEMP_DIR};
use forum_corpus::{
    DatasetConfig, Document, ForumEngine, Manifest, SelectorOverrides, StateStore, TopicRecord,
    VisitRecord,
};

const POST_A1: &str = "Witam wszystkich serdecznie na naszym forum dyskusyjnym.";
const POST_A2: &str = "Dziękuję za miłe powitanie, również się cieszę.";
const POST_B1: &str = "Pierwszy post drugiego tematu, nieco dłuższy od minimum.";
const POST_B2: &str = "Drugi post, ciąg dalszy rozmowy o wszystkim i niczym.";
const POST_B3: &str = "Trzeci post kończący wątek na następnej stronie.";

fn listing_page(server_uri: &str) -> String {
    format!(
        r#"<html><body>
            <ul class="topiclist">
              <li><a class="topictitle" href="{server_uri}/viewtopic.php?f=1&t=10">Powitania</a></li>
              <li><a class="topictitle" href="{server_uri}/viewtopic.php?f=1&t=11">Rozmowy</a></li>
            </ul>
        </body></html>"#
    )
}

fn topic_page(title: &str, posts: &[&str], next_href: Option<&str>) -> String {
    let bodies: String = posts
        .iter()
        .map(|p| format!(r#"<div class="content">{p}</div>"#))
        .collect();
    let next = next_href
        .map(|href| format!(r#"<a href="{href}">Następna</a>"#))
        .unwrap_or_default();
    format!(r#"<html><body><h2 class="topic-title">{title}</h2>{bodies}{next}</body></html>"#)
}

async fn mount_allow_all_robots(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /\n"))
        .mount(server)
        .await;
}

/// Serve the two-topic phpBB fixture: t=10 has one page with two posts,
/// t=11 has three posts split over two pages linked by `start=`.
async fn mount_forum(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&server.uri())))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/viewtopic.php"))
        .and(query_param("t", "10"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(topic_page("Powitania", &[POST_A1, POST_A2], None)),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/viewtopic.php"))
        .and(query_param("t", "11"))
        .and(query_param("start", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_string(topic_page(
            "Rozmowy",
            &[POST_B3],
            None,
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/viewtopic.php"))
        .and(query_param("t", "11"))
        .respond_with(ResponseTemplate::new(200).set_body_string(topic_page(
            "Rozmowy",
            &[POST_B1, POST_B2],
            Some("./viewtopic.php?f=1&t=11&start=25"),
        )))
        .mount(server)
        .await;
}

fn config_for(server: &MockServer, dir: &TempDir) -> DatasetConfig {
    DatasetConfig::builder(server.uri())
        .engine(ForumEngine::PhpBb)
        .name("test_corpus")
        .delay_secs(0.0)
        .workspace_root(dir.path())
        .build()
        .unwrap()
}

fn read_corpus(path: &std::path::Path) -> Vec<Document> {
    ShardReader::open(path)
        .unwrap()
        .collect::<forum_corpus::Result<Vec<_>>>()
        .unwrap()
}

fn expected_text_t10() -> String {
    format!("{POST_A1}\n{POST_A2}")
}

fn expected_text_t11() -> String {
    format!("{POST_B1}\n{POST_B2}\n{POST_B3}")
}

#[tokio::test]
async fn fresh_phpbb_run_produces_two_documents() {
    let server = MockServer::start().await;
    mount_allow_all_robots(&server).await;
    mount_forum(&server).await;

    let dir = TempDir::new().unwrap();
    let summary = forum_corpus::run(config_for(&server, &dir)).await.unwrap();

    assert_eq!(summary.topics, 2);
    assert_eq!(summary.documents, 2);
    let archive_path = summary.archive_path.as_ref().unwrap();
    assert!(archive_path.ends_with("archive_merged-JSONL_ZST/test_corpus.jsonl.zst"));

    let docs = read_corpus(archive_path);
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].text, expected_text_t10());
    assert_eq!(docs[1].text, expected_text_t11());
    assert_eq!(docs[0].meta.topic_title, "Powitania");
    assert_eq!(docs[1].meta.topic_title, "Rozmowy");

    // Character accounting: meta matches the text, the summary matches the sum.
    for doc in &docs {
        assert_eq!(doc.meta.characters, doc.text.chars().count());
    }
    let char_sum: u64 = docs.iter().map(|d| d.meta.characters as u64).sum();
    assert_eq!(summary.characters, char_sum);

    // Visited table holds exactly the two processed URLs.
    let config = config_for(&server, &dir);
    let state = StateStore::open(&config).unwrap();
    let rows = state.load_visited().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.visited && !r.skipped));

    // Manifest sits next to the corpus and carries the same numbers.
    let manifest_path = summary.manifest_path.unwrap();
    let manifest: Manifest =
        serde_json::from_str(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
    assert_eq!(manifest.project, "SpeakLeash");
    assert_eq!(manifest.stats.documents, 2);
    assert_eq!(manifest.stats.characters, char_sum);
    assert_eq!(manifest.stats.words, 0);
}

#[tokio::test]
async fn resume_after_interruption_matches_clean_run() {
    // Clean run first, for the reference result.
    let clean_server = MockServer::start().await;
    mount_allow_all_robots(&clean_server).await;
    mount_forum(&clean_server).await;
    let clean_dir = TempDir::new().unwrap();
    let clean = forum_corpus::run(config_for(&clean_server, &clean_dir))
        .await
        .unwrap();
    let clean_docs = read_corpus(clean.archive_path.as_ref().unwrap());
    let clean_texts: BTreeSet<String> = clean_docs.iter().map(|d| d.text.clone()).collect();

    // Interrupted run: the first topic was committed before the "crash" —
    // topics table, one visited row and one sealed shard are on disk.
    let server = MockServer::start().await;
    mount_allow_all_robots(&server).await;
    mount_forum(&server).await;
    let dir = TempDir::new().unwrap();
    let config = config_for(&server, &dir);
    let state = StateStore::open(&config).unwrap();
    let t10 = format!("{}/viewtopic.php?f=1&t=10", server.uri());
    let t11 = format!("{}/viewtopic.php?f=1&t=11", server.uri());
    state
        .save_topics(&[
            TopicRecord {
                url: t10.clone(),
                title: "Powitania".into(),
            },
            TopicRecord {
                url: t11.clone(),
                title: "Rozmowy".into(),
            },
        ])
        .unwrap();
    state
        .append_visited(&[VisitRecord {
            url: t10.clone(),
            title: "Powitania".into(),
            visited: true,
            skipped: false,
        }])
        .unwrap();
    let mut archive = ChunkArchive::open(config.dataset_dir().join(TEMP_DIR)).unwrap();
    archive
        .add(&Document::new(
            expected_text_t10(),
            t10.clone(),
            "Powitania".into(),
        ))
        .unwrap();
    archive.commit().unwrap();
    drop(archive);

    let resumed = forum_corpus::run(config_for(&server, &dir)).await.unwrap();
    assert_eq!(resumed.added_this_run, 1, "only the pending topic is scraped");
    assert_eq!(resumed.documents, 2);

    let resumed_docs = read_corpus(resumed.archive_path.as_ref().unwrap());
    let resumed_texts: BTreeSet<String> = resumed_docs.iter().map(|d| d.text.clone()).collect();
    assert_eq!(resumed_texts, clean_texts);

    let resumed_urls: BTreeSet<String> =
        resumed_docs.iter().map(|d| d.meta.url.clone()).collect();
    assert_eq!(resumed_urls, BTreeSet::from([t10, t11]));
}

#[tokio::test]
async fn robots_denied_topic_is_recorded_and_run_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "User-agent: *\nDisallow: /viewtopic.php?f=1&t=11\n",
        ))
        .mount(&server)
        .await;
    mount_forum(&server).await;

    let dir = TempDir::new().unwrap();
    let config = config_for(&server, &dir);

    // Topics were enumerated before the denial took effect (resume-style
    // table), so the scraper has to make the robots decision itself.
    let state = StateStore::open(&config).unwrap();
    state
        .save_topics(&[
            TopicRecord {
                url: format!("{}/viewtopic.php?f=1&t=10", server.uri()),
                title: "Powitania".into(),
            },
            TopicRecord {
                url: format!("{}/viewtopic.php?f=1&t=11", server.uri()),
                title: "Rozmowy".into(),
            },
        ])
        .unwrap();

    let summary = forum_corpus::run(config).await.unwrap();
    assert_eq!(summary.documents, 1);

    let config = config_for(&server, &dir);
    let state = StateStore::open(&config).unwrap();
    let rows = state.load_visited().unwrap();
    assert_eq!(rows.len(), 2);
    let denied = rows.iter().find(|r| r.url.contains("t=11")).unwrap();
    assert!(denied.visited && denied.skipped);
    let allowed = rows.iter().find(|r| r.url.contains("t=10")).unwrap();
    assert!(allowed.visited && !allowed.skipped);
}

#[tokio::test]
async fn empty_sitemap_falls_back_to_html_crawl() {
    let server = MockServer::start().await;
    let sitemap_url = format!("{}/sitemap.xml", server.uri());
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "User-agent: *\nAllow: /\nSitemap: {sitemap_url}\n"
        )))
        .mount(&server)
        .await;
    // The advertised sitemap exists but contains only non-topic pages.
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<urlset><url><loc>{}/memberlist.php</loc></url></urlset>",
            server.uri()
        )))
        .mount(&server)
        .await;
    mount_forum(&server).await;

    let dir = TempDir::new().unwrap();
    // Constrain topics to viewtopic URLs so the sitemap entry is filtered out.
    let config = DatasetConfig::builder(server.uri())
        .engine(ForumEngine::PhpBb)
        .name("test_corpus")
        .delay_secs(0.0)
        .workspace_root(dir.path())
        .overrides(SelectorOverrides {
            topics_whitelist: vec!["viewtopic".into()],
            ..Default::default()
        })
        .build()
        .unwrap();

    let summary = forum_corpus::run(config).await.unwrap();
    assert_eq!(summary.topics, 2);
    assert_eq!(summary.documents, 2);
}

#[tokio::test]
async fn oversize_topic_is_skipped_other_survives() {
    let server = MockServer::start().await;
    mount_allow_all_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&server.uri())))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/viewtopic.php"))
        .and(query_param("t", "10"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(topic_page("Powitania", &[POST_A1, POST_A2], None)),
        )
        .mount(&server)
        .await;
    // 16 MB of padding blows through the body cap.
    let oversize = "x".repeat(16_000_000);
    Mock::given(method("GET"))
        .and(path("/viewtopic.php"))
        .and(query_param("t", "11"))
        .respond_with(ResponseTemplate::new(200).set_body_string(oversize))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let summary = forum_corpus::run(config_for(&server, &dir)).await.unwrap();
    assert_eq!(summary.documents, 1);

    let config = config_for(&server, &dir);
    let state = StateStore::open(&config).unwrap();
    let rows = state.load_visited().unwrap();
    let oversized = rows.iter().find(|r| r.url.contains("t=11")).unwrap();
    assert!(oversized.visited && oversized.skipped);
}

#[tokio::test]
async fn operator_body_selector_override_rescues_extraction() {
    let server = MockServer::start().await;
    mount_allow_all_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body>
                <a class="topictitle" href="{0}/viewtopic.php?f=1&t=10">Inny szablon</a>
            </body></html>"#,
            server.uri()
        )))
        .mount(&server)
        .await;
    // Bodies wrapped in div.my-post; the stock div.content never matches.
    Mock::given(method("GET"))
        .and(path("/viewtopic.php"))
        .and(query_param("t", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body>
                <h2 class="topic-title">Inny szablon</h2>
                <div class="my-post">{POST_A1}</div>
                <div class="my-post">{POST_A2}</div>
            </body></html>"#
        )))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = DatasetConfig::builder(server.uri())
        .engine(ForumEngine::PhpBb)
        .name("test_corpus")
        .delay_secs(0.0)
        .workspace_root(dir.path())
        .overrides(SelectorOverrides {
            content_class: vec!["div >> class :: my-post".into()],
            ..Default::default()
        })
        .build()
        .unwrap();

    let summary = forum_corpus::run(config).await.unwrap();
    assert_eq!(summary.documents, 1);
    let docs = read_corpus(summary.archive_path.as_ref().unwrap());
    assert_eq!(docs[0].text, expected_text_t10());
}

#[tokio::test]
async fn robots_denying_everything_aborts_without_force() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = forum_corpus::run(config_for(&server, &dir)).await;
    assert!(matches!(
        result,
        Err(forum_corpus::ScrapeError::RobotsDenied(_))
    ));
}

#[tokio::test]
async fn second_run_over_finished_dataset_is_a_no_op() {
    let server = MockServer::start().await;
    mount_allow_all_robots(&server).await;
    mount_forum(&server).await;

    let dir = TempDir::new().unwrap();
    let first = forum_corpus::run(config_for(&server, &dir)).await.unwrap();
    let second = forum_corpus::run(config_for(&server, &dir)).await.unwrap();

    assert_eq!(second.added_this_run, 0);
    assert_eq!(second.documents, first.documents);
    let docs = read_corpus(second.archive_path.as_ref().unwrap());
    assert_eq!(docs.len(), 2);
}
