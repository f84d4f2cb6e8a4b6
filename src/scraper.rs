//! The scraping stage: a bounded worker pool feeding a single coordinator.
//!
//! Workers are plain tokio tasks, each constructed with its own HTTP
//! session and a read-only snapshot of the visited set — nothing is shared
//! mutably. They pull topic URLs from a common queue and push indexed
//! results back over a channel. The coordinator re-orders results into
//! submission order before touching disk, so the archive and the visited
//! table are reproducible regardless of which worker finished first.
//! Workers never write to disk.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::archive::{ChunkArchive, Document};
use crate::config::DatasetConfig;
use crate::engine::EngineProfile;
use crate::error::Result;
use crate::extract::{SkipReason, TopicExtractor, TopicOutcome};
use crate::http::HttpClient;
use crate::robots::RobotsGate;
use crate::state::{StateStore, TopicRecord, VisitRecord};

/// Totals for one scraping session.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScrapeStats {
    /// URLs processed this session.
    pub processed: usize,
    /// Documents added this session.
    pub added: usize,
    /// URLs skipped this session.
    pub skipped: usize,
    /// Documents in the archive overall, including previous sessions.
    pub total_docs: usize,
}

struct WorkerResult {
    index: usize,
    topic: TopicRecord,
    outcome: TopicOutcome,
}

struct WorkerContext {
    http: HttpClient,
    config: Arc<DatasetConfig>,
    profile: Arc<EngineProfile>,
    gate: Arc<RobotsGate>,
    visited: Arc<HashSet<String>>,
    delay: Duration,
}

/// Scrape every not-yet-visited topic, appending documents to the archive
/// and visit rows to the state store.
pub async fn run_scraper(
    config: Arc<DatasetConfig>,
    gate: Arc<RobotsGate>,
    state: &StateStore,
    archive: &mut ChunkArchive,
    topics: Vec<TopicRecord>,
) -> Result<ScrapeStats> {
    let visited_rows = state.load_visited()?;
    state.ensure_visited()?;

    let visited_set: HashSet<String> = visited_rows
        .iter()
        .filter(|row| row.visited)
        .map(|row| row.url.clone())
        .collect();
    let mut stats = ScrapeStats {
        total_docs: visited_rows
            .iter()
            .filter(|row| row.visited && !row.skipped)
            .count(),
        ..Default::default()
    };

    let pending: Vec<TopicRecord> = topics
        .into_iter()
        .filter(|topic| !visited_set.contains(&topic.url))
        .collect();
    if pending.is_empty() {
        tracing::info!("nothing to scrape, all topics already visited");
        return Ok(stats);
    }

    let workers = gate.effective_workers(config.workers).max(1);
    let delay = Duration::from_secs_f64(gate.effective_delay(config.delay_secs).max(0.0));
    tracing::info!(
        "scraping {} topic(s) with {workers} worker(s), {:.2}s between requests",
        pending.len(),
        delay.as_secs_f64()
    );

    let total_pending = pending.len();
    let queue: Arc<Mutex<VecDeque<(usize, TopicRecord)>>> =
        Arc::new(Mutex::new(pending.into_iter().enumerate().collect()));
    let (results_tx, mut results_rx) = mpsc::channel::<WorkerResult>(workers.max(1) * 2);
    let visited_snapshot = Arc::new(visited_set);
    let profile = Arc::new(config.profile().clone());

    let mut pool = JoinSet::new();
    for worker_id in 0..workers {
        let context = WorkerContext {
            http: HttpClient::new()?,
            config: Arc::clone(&config),
            profile: Arc::clone(&profile),
            gate: Arc::clone(&gate),
            visited: Arc::clone(&visited_snapshot),
            delay,
        };
        pool.spawn(worker_loop(
            worker_id,
            Arc::clone(&queue),
            results_tx.clone(),
            context,
        ));
    }
    drop(results_tx);

    // Drain results in submission order. Out-of-order arrivals wait in the
    // reorder buffer; each released result is fully processed (archive add,
    // state bookkeeping) before the next is pulled.
    let mut reorder: BTreeMap<usize, WorkerResult> = BTreeMap::new();
    let mut next_index = 0usize;
    let mut row_buffer: Vec<VisitRecord> = Vec::new();
    let started = Instant::now();
    let progress = progress_bar(total_pending as u64);

    while let Some(result) = results_rx.recv().await {
        reorder.insert(result.index, result);
        while let Some(result) = reorder.remove(&next_index) {
            next_index += 1;
            progress.inc(1);
            process_result(
                result,
                &config,
                archive,
                state,
                &mut row_buffer,
                &mut stats,
                total_pending,
                started,
            )?;
        }
    }

    // A dead worker leaves holes in the index space; release whatever is
    // left in order rather than losing it.
    if !reorder.is_empty() {
        tracing::error!(
            "result stream ended with {} out-of-order result(s), flushing",
            reorder.len()
        );
        let stragglers: Vec<WorkerResult> =
            std::mem::take(&mut reorder).into_values().collect();
        for result in stragglers {
            process_result(
                result,
                &config,
                archive,
                state,
                &mut row_buffer,
                &mut stats,
                total_pending,
                started,
            )?;
        }
    }

    let mut finished = 0usize;
    while let Some(join) = pool.join_next().await {
        match join {
            Ok(()) => finished += 1,
            Err(err) => tracing::error!("worker task failed: {err}"),
        }
    }
    if finished != workers {
        tracing::error!("worker pool finished with {finished} of {workers} workers");
    }

    progress.finish_and_clear();
    archive.commit()?;
    state.append_visited(&row_buffer)?;
    tracing::info!(
        "scraping done: processed {} | added {} | skipped {} | total documents {}",
        stats.processed,
        stats.added,
        stats.skipped,
        stats.total_docs
    );
    Ok(stats)
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:40} {pos}/{len} topics [{elapsed_precise} elapsed, eta {eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<VecDeque<(usize, TopicRecord)>>>,
    results: mpsc::Sender<WorkerResult>,
    context: WorkerContext,
) {
    tracing::debug!("worker {worker_id} started");
    let extractor = TopicExtractor {
        http: &context.http,
        config: &context.config,
        profile: &context.profile,
        delay: context.delay,
    };

    loop {
        let job = queue.lock().await.pop_front();
        let Some((index, topic)) = job else { break };

        let outcome = process_topic(&extractor, &context, &topic).await;
        if results
            .send(WorkerResult {
                index,
                topic,
                outcome,
            })
            .await
            .is_err()
        {
            // Coordinator went away; nothing useful left to do.
            break;
        }
    }
    tracing::debug!("worker {worker_id} finished");
}

async fn process_topic(
    extractor: &TopicExtractor<'_>,
    context: &WorkerContext,
    topic: &TopicRecord,
) -> TopicOutcome {
    if context.visited.contains(&topic.url) {
        tracing::debug!("already visited, skipping: {}", topic.url);
        return TopicOutcome::Skipped(SkipReason::AlreadyVisited);
    }
    if !context.gate.allowed(&topic.url) {
        tracing::info!("denied by robots.txt: {}", topic.url);
        return TopicOutcome::Skipped(SkipReason::Robots);
    }
    let Ok(url) = url::Url::parse(&topic.url) else {
        tracing::warn!("unparsable topic URL: {}", topic.url);
        return TopicOutcome::Skipped(SkipReason::Error);
    };
    if !context.config.same_host(&url) {
        tracing::warn!("topic URL off the dataset host: {url}");
        return TopicOutcome::Skipped(SkipReason::Error);
    }
    extractor.extract(&url).await
}

#[allow(clippy::too_many_arguments)]
fn process_result(
    result: WorkerResult,
    config: &DatasetConfig,
    archive: &mut ChunkArchive,
    state: &StateStore,
    row_buffer: &mut Vec<VisitRecord>,
    stats: &mut ScrapeStats,
    total_pending: usize,
    started: Instant,
) -> Result<()> {
    stats.processed += 1;
    let WorkerResult { topic, outcome, .. } = result;

    match outcome {
        TopicOutcome::Extracted { text, title } => {
            let trimmed = text.trim();
            if trimmed.chars().count() > config.min_text_len {
                // The discovery title wins over the extracted one; "x"
                // stands in when neither exists so the field is never blank.
                let mut final_title = if !topic.title.is_empty() {
                    topic.title.clone()
                } else {
                    title
                };
                if final_title.is_empty() {
                    final_title = "x".to_string();
                }
                let document =
                    Document::new(trimmed.to_string(), topic.url.clone(), final_title.clone());
                archive.add(&document)?;
                stats.added += 1;
                stats.total_docs += 1;
                row_buffer.push(VisitRecord {
                    url: topic.url,
                    title: final_title,
                    visited: true,
                    skipped: false,
                });
            } else {
                tracing::debug!("text below minimum length, skipping: {}", topic.url);
                stats.skipped += 1;
                row_buffer.push(VisitRecord {
                    url: topic.url,
                    title: topic.title,
                    visited: true,
                    skipped: true,
                });
            }
        }
        TopicOutcome::Skipped(SkipReason::AlreadyVisited) => {
            // Already in the visited table; appending would only duplicate.
            stats.skipped += 1;
        }
        TopicOutcome::Skipped(reason) => {
            tracing::debug!("skipped ({}): {}", reason.as_str(), topic.url);
            stats.skipped += 1;
            row_buffer.push(VisitRecord {
                url: topic.url,
                title: topic.title,
                visited: true,
                skipped: true,
            });
        }
    }

    // Checkpoint: flush state rows and seal the running shard, but only
    // once at least one document exists to make the shard worth sealing.
    if stats.processed % config.checkpoint_interval == 0 && stats.added > 0 {
        state.append_visited(row_buffer)?;
        row_buffer.clear();
        archive.commit()?;

        let elapsed = started.elapsed().as_secs_f64().max(1e-9);
        let rate = stats.processed as f64 / elapsed;
        let remaining = total_pending.saturating_sub(stats.processed);
        let eta_secs = remaining as f64 / rate.max(1e-9);
        tracing::info!(
            "checkpoint: {}/{} processed | added {} | skipped {} | {:.2} topics/s | ETA {:.1} min",
            stats.processed,
            total_pending,
            stats.added,
            stats.skipped,
            rate,
            eta_secs / 60.0
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ForumEngine;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn topic_page(posts: &[&str], title: &str) -> String {
        let bodies: String = posts
            .iter()
            .map(|p| format!(r#"<div class="content">{p}</div>"#))
            .collect();
        format!(r#"<html><body><h2 class="topic-title">{title}</h2>{bodies}</body></html>"#)
    }

    async fn scrape(
        server: &MockServer,
        dir: &TempDir,
        topics: Vec<TopicRecord>,
    ) -> (ScrapeStats, StateStore, std::path::PathBuf) {
        let config = Arc::new(
            DatasetConfig::builder(server.uri())
                .engine(ForumEngine::PhpBb)
                .name("test_corpus")
                .delay_secs(0.0)
                .checkpoint_interval(1)
                .workspace_root(dir.path())
                .build()
                .unwrap(),
        );
        let state = StateStore::open(&config).unwrap();
        let temp_data = config.dataset_dir().join(crate::archive::TEMP_DIR);
        let mut archive = ChunkArchive::open(&temp_data).unwrap();
        let gate = Arc::new(RobotsGate::allow_all(false));
        let stats = run_scraper(Arc::clone(&config), gate, &state, &mut archive, topics)
            .await
            .unwrap();
        (stats, state, config.dataset_dir())
    }

    fn topic(server: &MockServer, t: u32, title: &str) -> TopicRecord {
        TopicRecord {
            url: format!("{}/viewtopic.php?f=1&t={t}", server.uri()),
            title: title.to_string(),
        }
    }

    #[tokio::test]
    async fn documents_follow_submission_order() {
        let server = MockServer::start().await;
        for t in 10..14 {
            Mock::given(method("GET"))
                .and(path("/viewtopic.php"))
                .and(query_param("t", t.to_string()))
                .respond_with(ResponseTemplate::new(200).set_body_string(topic_page(
                    &[&format!("post body of topic {t} with enough characters")],
                    &format!("Topic {t}"),
                )))
                .mount(&server)
                .await;
        }

        let dir = TempDir::new().unwrap();
        let topics: Vec<TopicRecord> =
            (10..14).map(|t| topic(&server, t, "")).collect();
        let (stats, state, dataset_dir) = scrape(&server, &dir, topics).await;

        assert_eq!(stats.added, 4);
        assert_eq!(stats.processed, 4);

        // Archive order equals submission order even with two workers.
        let mut urls = Vec::new();
        let temp_data = dataset_dir.join(crate::archive::TEMP_DIR);
        let mut shards: Vec<_> = std::fs::read_dir(&temp_data)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        shards.sort();
        for shard in shards {
            for doc in crate::archive::ShardReader::open(&shard).unwrap() {
                urls.push(doc.unwrap().meta.url);
            }
        }
        for (i, url) in urls.iter().enumerate() {
            assert!(url.contains(&format!("t={}", 10 + i)), "order broke at {i}: {url}");
        }

        let rows = state.load_visited().unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.visited && !r.skipped));
    }

    #[tokio::test]
    async fn short_and_failing_topics_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/viewtopic.php"))
            .and(query_param("t", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_string(topic_page(
                &["a long enough post body for the corpus"],
                "Good",
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/viewtopic.php"))
            .and(query_param("t", "11"))
            .respond_with(ResponseTemplate::new(200).set_body_string(topic_page(&["tiny"], "Short")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/viewtopic.php"))
            .and(query_param("t", "12"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let topics = vec![
            topic(&server, 10, "Good"),
            topic(&server, 11, "Short"),
            topic(&server, 12, "Gone"),
        ];
        let (stats, state, _) = scrape(&server, &dir, topics).await;

        assert_eq!(stats.added, 1);
        assert_eq!(stats.skipped, 2);

        let rows = state.load_visited().unwrap();
        assert_eq!(rows.len(), 3);
        let good = rows.iter().find(|r| r.url.contains("t=10")).unwrap();
        assert!(!good.skipped);
        let short = rows.iter().find(|r| r.url.contains("t=11")).unwrap();
        assert!(short.skipped);
        let gone = rows.iter().find(|r| r.url.contains("t=12")).unwrap();
        assert!(gone.skipped);
    }

    #[tokio::test]
    async fn visited_topics_are_not_refetched() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        // Pre-seed the visited table: t=10 already produced a document.
        {
            let config = DatasetConfig::builder(server.uri())
                .name("test_corpus")
                .workspace_root(dir.path())
                .build()
                .unwrap();
            let state = StateStore::open(&config).unwrap();
            state
                .append_visited(&[VisitRecord {
                    url: format!("{}/viewtopic.php?f=1&t=10", server.uri()),
                    title: "Done".into(),
                    visited: true,
                    skipped: false,
                }])
                .unwrap();
        }

        Mock::given(method("GET"))
            .and(path("/viewtopic.php"))
            .and(query_param("t", "11"))
            .respond_with(ResponseTemplate::new(200).set_body_string(topic_page(
                &["fresh topic body long enough to keep"],
                "Fresh",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let topics = vec![topic(&server, 10, "Done"), topic(&server, 11, "Fresh")];
        let (stats, state, _) = scrape(&server, &dir, topics).await;

        // t=10 was filtered out before the pool even saw it.
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.total_docs, 2);
        assert_eq!(state.load_visited().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn robots_denial_is_recorded_not_fetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/viewtopic.php"))
            .and(query_param("t", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_string(topic_page(
                &["allowed topic body long enough to keep"],
                "Allowed",
            )))
            .mount(&server)
            .await;
        // No mock for t=11: fetching it would fail the .expect below.
        Mock::given(method("GET"))
            .and(path("/viewtopic.php"))
            .and(query_param("t", "11"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = Arc::new(
            DatasetConfig::builder(server.uri())
                .engine(ForumEngine::PhpBb)
                .name("test_corpus")
                .delay_secs(0.0)
                .workspace_root(dir.path())
                .build()
                .unwrap(),
        );
        let state = StateStore::open(&config).unwrap();
        let mut archive =
            ChunkArchive::open(config.dataset_dir().join(crate::archive::TEMP_DIR)).unwrap();

        // A gate whose policy denies t=11.
        let robots_txt = "User-agent: *\nDisallow: /viewtopic.php?f=1&t=11\n";
        let robot = texting_robots::Robot::new("Speakleash", robots_txt.as_bytes()).unwrap();
        assert!(!robot.allowed(&format!("{}/viewtopic.php?f=1&t=11", server.uri())));
        let gate = Arc::new(gate_from(robot));

        let topics = vec![topic(&server, 10, ""), topic(&server, 11, "")];
        let stats = run_scraper(Arc::clone(&config), gate, &state, &mut archive, topics)
            .await
            .unwrap();

        assert_eq!(stats.added, 1);
        assert_eq!(stats.skipped, 1);
        let rows = state.load_visited().unwrap();
        let denied = rows.iter().find(|r| r.url.contains("t=11")).unwrap();
        assert!(denied.visited && denied.skipped);
    }

    fn gate_from(robot: texting_robots::Robot) -> RobotsGate {
        RobotsGate::from_robot(robot, false)
    }
}
