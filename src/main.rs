use anyhow::{anyhow, bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender};
use csv::Writer;
use dashmap::DashMap;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn, LevelFilter};
use rayon::prelude::*;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use simple_logger::SimpleLogger;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use time::macros::format_description;

const SOCIAL_SCIENCE_CONCEPTS: [&str; 4] =
    ["Sociology", "Psychology", "Economics", "Political Science"];
const QUANTITATIVE_CONCEPTS: [&str; 3] = ["Mathematics", "Physics", "Computer Science"];

const WORKS_PAGE_SIZE: usize = 200;
const MAX_WORK_AUTHORS: usize = 10;
const ID_LIST_DELIMITER: &str = ";";

const AUTHOR_TABLE_HEADERS: [&str; 6] = [
    "id",
    "display_name",
    "works_api_url",
    "h_index",
    "works_count",
    "country_code",
];
const PAPER_TABLE_HEADERS: [&str; 6] = [
    "id",
    "publication_year",
    "cited_by_count",
    "title",
    "author_ids",
    "abstract_inverted_index",
];
const ABSTRACT_TABLE_HEADERS: [&str; 3] = ["id", "title", "abstract"];

#[derive(Parser, Clone)]
#[command(name = "Co-Author Corpus Expander")]
#[command(
    about = "Expands a seed author set into a deduplicated corpus of co-authors and their publications bridging social-science and quantitative disciplines, harvested from the OpenAlex API."
)]
#[command(version = "1.0.0")]
struct Cli {
    #[arg(long, help = "Path to the seed papers CSV table", required = true)]
    papers: PathBuf,
    #[arg(long, help = "Path to the seed authors CSV table", required = true)]
    authors: PathBuf,
    #[arg(long, help = "Path to an existing abstracts CSV table")]
    abstracts: Option<PathBuf>,
    #[arg(short, long, help = "Output directory for the final CSV tables", required = true)]
    output: PathBuf,
    #[arg(short, long, default_value = "INFO", help = "Logging level (DEBUG, INFO, WARN, ERROR)")]
    log_level: String,
    #[arg(short, long, default_value = "5", help = "Number of concurrent fetch workers (0 for auto)")]
    workers: usize,
    #[arg(
        long,
        default_value = "https://api.openalex.org",
        help = "Base URL of the bibliographic API"
    )]
    api_base: String,
    #[arg(long, default_value = "5", help = "Minimum works count for a co-author to be kept")]
    min_works: i64,
    #[arg(long, default_value = "5000", help = "Maximum works count for a co-author to be kept")]
    max_works: i64,
    #[arg(
        long,
        default_value = "10",
        help = "Minimum citation count filter applied to the works listing"
    )]
    min_citations: i64,
    #[arg(long, default_value = "5", help = "Maximum attempts for a rate-limited request")]
    retry_attempts: u32,
    #[arg(long, default_value = "100", help = "Base delay in milliseconds between retry attempts")]
    retry_delay_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Deserialize)]
struct AuthorProfile {
    id: String,
    display_name: String,
    works_api_url: String,
    #[serde(default)]
    h_index: Option<i64>,
    #[serde(default)]
    works_count: Option<i64>,
    #[serde(default)]
    last_known_institution: Option<Institution>,
}

#[derive(Debug, Deserialize)]
struct Institution {
    #[serde(default)]
    country_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorksPage {
    #[serde(default)]
    results: Option<Vec<Work>>,
}

#[derive(Debug, Deserialize)]
struct Work {
    id: String,
    #[serde(default)]
    publication_year: Option<i64>,
    #[serde(default)]
    cited_by_count: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    #[serde(default)]
    concepts: Vec<Concept>,
    #[serde(default)]
    abstract_inverted_index: Option<BTreeMap<String, Vec<i64>>>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    #[serde(default)]
    author: Option<AuthorRef>,
}

#[derive(Debug, Deserialize)]
struct AuthorRef {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Concept {
    #[serde(default)]
    display_name: Option<String>,
}

impl Work {
    fn author_ids(&self) -> Vec<String> {
        self.authorships
            .iter()
            .filter_map(|authorship| authorship.author.as_ref())
            .filter_map(|author| author.id.clone())
            .collect()
    }

    fn concept_names(&self) -> Vec<&str> {
        self.concepts
            .iter()
            .filter_map(|concept| concept.display_name.as_deref())
            .collect()
    }

    // Full abstract text wins over the inverted index when both are present.
    fn abstract_payload(&self) -> Option<String> {
        if let Some(text) = self.abstract_text.as_ref().filter(|text| !text.trim().is_empty()) {
            return Some(text.clone());
        }
        self.abstract_inverted_index
            .as_ref()
            .filter(|index| !index.is_empty())
            .and_then(|index| serde_json::to_string(index).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct AuthorRecord {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    works_api_url: Option<String>,
    #[serde(default)]
    h_index: Option<i64>,
    #[serde(default)]
    works_count: Option<i64>,
    #[serde(default)]
    country_code: Option<String>,
}

impl From<AuthorProfile> for AuthorRecord {
    fn from(profile: AuthorProfile) -> Self {
        let country_code = profile
            .last_known_institution
            .and_then(|institution| institution.country_code);
        Self {
            id: profile.id,
            display_name: Some(profile.display_name),
            works_api_url: Some(profile.works_api_url),
            h_index: profile.h_index,
            works_count: profile.works_count,
            country_code,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PaperRecord {
    id: String,
    publication_year: Option<i64>,
    cited_by_count: Option<i64>,
    title: Option<String>,
    author_ids: Vec<String>,
    abstract_inverted_index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct AbstractRecord {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaperCsvRow {
    id: String,
    #[serde(default)]
    publication_year: Option<i64>,
    #[serde(default)]
    cited_by_count: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    author_ids: String,
    #[serde(default)]
    abstract_inverted_index: Option<String>,
}

trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for AuthorRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for PaperRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for AbstractRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

fn encode_id_list(ids: &[String]) -> String {
    ids.join(ID_LIST_DELIMITER)
}

// List-cell contract: ';'-delimited, every token non-empty. Legacy
// Python-list renderings of the same field are rejected outright.
fn decode_id_list(cell: &str) -> Result<Vec<String>> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') || trimmed.contains('\'') || trimmed.contains('"') {
        bail!("author_ids field '{}' is not a ';'-delimited identifier list", cell);
    }
    let mut ids = Vec::new();
    for (position, token) in trimmed.split(ID_LIST_DELIMITER).enumerate() {
        let token = token.trim();
        if token.is_empty() {
            bail!("empty identifier at position {} in author_ids field '{}'", position, cell);
        }
        ids.push(token.to_string());
    }
    Ok(ids)
}

fn co_author_frontier(papers: &[PaperRecord], known_author_ids: &HashSet<String>) -> HashSet<String> {
    let mut frontier = HashSet::new();
    for paper in papers {
        for author_id in &paper.author_ids {
            if !known_author_ids.contains(author_id) {
                frontier.insert(author_id.clone());
            }
        }
    }
    frontier
}

fn bridges_disciplines(concept_names: &[&str]) -> bool {
    let social = concept_names
        .iter()
        .any(|concept| SOCIAL_SCIENCE_CONCEPTS.contains(concept));
    let quantitative = concept_names
        .iter()
        .any(|concept| QUANTITATIVE_CONCEPTS.contains(concept));
    social && quantitative
}

fn within_works_band(author: &AuthorRecord, min_works: i64, max_works: i64) -> bool {
    author
        .works_count
        .map_or(false, |count| count >= min_works && count <= max_works)
}

fn merge_by_id<T: Keyed>(tables: Vec<Vec<T>>) -> Vec<T> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();
    for table in tables {
        for row in table {
            if seen.insert(row.key().to_string()) {
                merged.push(row);
            }
        }
    }
    merged
}

struct FetchStats {
    pages_fetched: AtomicUsize,
    page_failures: AtomicUsize,
    remote_failures: DashMap<u16, usize>,
}

impl FetchStats {
    fn new() -> Self {
        Self {
            pages_fetched: AtomicUsize::new(0),
            page_failures: AtomicUsize::new(0),
            remote_failures: DashMap::new(),
        }
    }

    fn record_remote_failure(&self, status: u16) {
        self.remote_failures
            .entry(status)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn remote_failure_counts(&self) -> Vec<(u16, usize)> {
        let mut counts: Vec<(u16, usize)> = self
            .remote_failures
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        counts.sort_by_key(|&(status, _)| status);
        counts
    }
}

trait BibliographicApi: Sync {
    fn author_profile(&self, author_id: &str) -> Result<AuthorProfile>;
    fn works_page(&self, author_id: &str, page: usize) -> Result<WorksPage>;
}

struct OpenAlexClient {
    http: Client,
    base_url: String,
    min_citations: i64,
    retry: RetryPolicy,
    stats: Arc<FetchStats>,
}

impl OpenAlexClient {
    fn new(
        base_url: String,
        min_citations: i64,
        retry: RetryPolicy,
        stats: Arc<FetchStats>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("coauthor-harvesting/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            min_citations,
            retry,
            stats,
        })
    }

    // Both endpoints share one bounded retry policy: rate-limited requests
    // are retried with exponential backoff, everything else fails at once.
    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = self
                .http
                .get(url)
                .send()
                .with_context(|| format!("request to {} failed", url))?;
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.retry.max_attempts {
                let delay = self.retry.delay_for(attempt);
                debug!(
                    "Rate limited on {} (attempt {}/{}), retrying in {:?}",
                    url, attempt, self.retry.max_attempts, delay
                );
                thread::sleep(delay);
                continue;
            }
            if !status.is_success() {
                self.stats.record_remote_failure(status.as_u16());
                bail!("status {}", status.as_u16());
            }
            return response
                .json::<T>()
                .with_context(|| format!("failed to decode response from {}", url));
        }
    }
}

impl BibliographicApi for OpenAlexClient {
    fn author_profile(&self, author_id: &str) -> Result<AuthorProfile> {
        self.get_json(&format!("{}/authors/{}", self.base_url, author_id))
    }

    fn works_page(&self, author_id: &str, page: usize) -> Result<WorksPage> {
        self.get_json(&format!(
            "{}/works?filter=author.id:{},cited_by_count:>{}&per-page={}&page={}",
            self.base_url, author_id, self.min_citations, WORKS_PAGE_SIZE, page
        ))
    }
}

fn fetch_co_author_profile(api: &dyn BibliographicApi, author_id: &str) -> Option<AuthorRecord> {
    match api.author_profile(author_id) {
        Ok(profile) => Some(AuthorRecord::from(profile)),
        Err(e) => {
            error!("Error fetching details for author {}: {:#}", author_id, e);
            None
        }
    }
}

#[derive(Debug, Default)]
struct HarvestBatch {
    papers: Vec<PaperRecord>,
    abstracts: Vec<AbstractRecord>,
}

impl HarvestBatch {
    fn is_empty(&self) -> bool {
        self.papers.is_empty() && self.abstracts.is_empty()
    }
}

fn harvest_author_works(
    api: &dyn BibliographicApi,
    author_id: &str,
    stats: &FetchStats,
) -> HarvestBatch {
    let mut batch = HarvestBatch::default();
    let mut page = 1usize;
    loop {
        let works_page = match api.works_page(author_id, page) {
            Ok(works_page) => works_page,
            Err(e) => {
                // Pages already collected for this author are kept.
                error!(
                    "Error fetching works page {} for co-author {}: {:#}",
                    page, author_id, e
                );
                stats.page_failures.fetch_add(1, Ordering::Relaxed);
                break;
            }
        };
        stats.pages_fetched.fetch_add(1, Ordering::Relaxed);
        let works = match works_page.results {
            Some(works) if !works.is_empty() => works,
            _ => break,
        };
        for work in works {
            if work.authorships.len() >= MAX_WORK_AUTHORS {
                continue;
            }
            if !bridges_disciplines(&work.concept_names()) {
                continue;
            }
            let author_ids = work.author_ids();
            if let Some(payload) = work.abstract_payload() {
                batch.abstracts.push(AbstractRecord {
                    id: work.id.clone(),
                    title: work.title.clone(),
                    abstract_text: Some(payload),
                });
            }
            let inverted_index_cell = work
                .abstract_inverted_index
                .as_ref()
                .filter(|index| !index.is_empty())
                .and_then(|index| serde_json::to_string(index).ok());
            batch.papers.push(PaperRecord {
                id: work.id,
                publication_year: work.publication_year,
                cited_by_count: work.cited_by_count,
                title: work.title,
                author_ids,
                abstract_inverted_index: inverted_index_cell,
            });
        }
        page += 1;
    }
    batch
}

fn run_pool<T, F>(pool: &rayon::ThreadPool, ids: &[String], worker: F) -> Vec<Option<T>>
where
    T: Send,
    F: Fn(&str) -> Option<T> + Sync,
{
    pool.install(|| ids.par_iter().map(|id| worker(id.as_str())).collect())
}

struct MergeWriter<W: IoWrite> {
    writer: Writer<W>,
    written_ids: HashSet<String>,
    rows_written: usize,
}

impl<W: IoWrite> MergeWriter<W> {
    fn new(sink: W, headers: &[&str]) -> Result<Self> {
        let mut writer = Writer::from_writer(sink);
        writer.write_record(headers)?;
        Ok(Self {
            writer,
            written_ids: HashSet::new(),
            rows_written: 0,
        })
    }

    // First row seen for an identifier wins; later duplicates are dropped.
    fn write_row(&mut self, id: &str, fields: &[String]) -> Result<bool> {
        if !self.written_ids.insert(id.to_string()) {
            return Ok(false);
        }
        self.writer.write_record(fields)?;
        self.rows_written += 1;
        Ok(true)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

fn cell_i64(value: Option<i64>) -> String {
    value.map_or_else(String::new, |value| value.to_string())
}

fn author_fields(author: &AuthorRecord) -> [String; 6] {
    [
        author.id.clone(),
        author.display_name.clone().unwrap_or_default(),
        author.works_api_url.clone().unwrap_or_default(),
        cell_i64(author.h_index),
        cell_i64(author.works_count),
        author.country_code.clone().unwrap_or_default(),
    ]
}

fn paper_fields(paper: &PaperRecord) -> [String; 6] {
    [
        paper.id.clone(),
        cell_i64(paper.publication_year),
        cell_i64(paper.cited_by_count),
        paper.title.clone().unwrap_or_default(),
        encode_id_list(&paper.author_ids),
        paper.abstract_inverted_index.clone().unwrap_or_default(),
    ]
}

fn abstract_fields(record: &AbstractRecord) -> [String; 3] {
    [
        record.id.clone(),
        record.title.clone().unwrap_or_default(),
        record.abstract_text.clone().unwrap_or_default(),
    ]
}

struct HarvestSink<W: IoWrite> {
    papers: MergeWriter<W>,
    abstracts: MergeWriter<W>,
}

impl<W: IoWrite> HarvestSink<W> {
    fn new(papers_sink: W, abstracts_sink: W) -> Result<Self> {
        Ok(Self {
            papers: MergeWriter::new(papers_sink, &PAPER_TABLE_HEADERS)?,
            abstracts: MergeWriter::new(abstracts_sink, &ABSTRACT_TABLE_HEADERS)?,
        })
    }

    fn seed(&mut self, papers: &[PaperRecord], abstracts: &[AbstractRecord]) -> Result<()> {
        for paper in papers {
            self.papers.write_row(&paper.id, &paper_fields(paper))?;
        }
        for record in abstracts {
            self.abstracts.write_row(&record.id, &abstract_fields(record))?;
        }
        Ok(())
    }

    fn write_batch(&mut self, batch: &HarvestBatch) -> Result<()> {
        for paper in &batch.papers {
            self.papers.write_row(&paper.id, &paper_fields(paper))?;
        }
        for record in &batch.abstracts {
            self.abstracts.write_row(&record.id, &abstract_fields(record))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.papers.flush()?;
        self.abstracts.flush()?;
        Ok(())
    }

    fn rows_written(&self) -> (usize, usize) {
        (self.papers.rows_written, self.abstracts.rows_written)
    }

    #[cfg(test)]
    fn into_writers(self) -> Result<(W, W)> {
        let papers = self
            .papers
            .writer
            .into_inner()
            .map_err(|e| anyhow!("failed to finalize papers table: {}", e))?;
        let abstracts = self
            .abstracts
            .writer
            .into_inner()
            .map_err(|e| anyhow!("failed to finalize abstracts table: {}", e))?;
        Ok((papers, abstracts))
    }
}

fn run_harvest_phase<W>(
    api: &dyn BibliographicApi,
    pool: &rayon::ThreadPool,
    co_author_ids: &[String],
    sink: HarvestSink<W>,
    stats: &FetchStats,
    progress: &ProgressBar,
) -> Result<(HarvestSink<W>, usize)>
where
    W: IoWrite + Send + 'static,
{
    let capacity = (pool.current_num_threads() * 2).max(16);
    let (batch_sender, batch_receiver): (Sender<HarvestBatch>, Receiver<HarvestBatch>) =
        bounded(capacity);

    let writer_thread = thread::spawn(move || {
        let mut sink = sink;
        for batch in batch_receiver {
            if batch.is_empty() {
                continue;
            }
            if let Err(e) = sink.write_batch(&batch) {
                error!("Writer thread failed to write harvest batch: {:#}", e);
            }
        }
        if let Err(e) = sink.flush() {
            error!("Writer thread failed to flush final tables: {:#}", e);
        }
        sink
    });

    let results = run_pool(pool, co_author_ids, |author_id| {
        let sender = batch_sender.clone();
        let batch = harvest_author_works(api, author_id, stats);
        let harvested = batch.papers.len();
        progress.inc(1);
        if sender.send(batch).is_err() {
            error!(
                "Failed to send harvest batch for {} to the writer thread",
                author_id
            );
            return None;
        }
        Some(harvested)
    });
    drop(batch_sender);

    let sink = writer_thread
        .join()
        .map_err(|_| anyhow!("harvest writer thread panicked"))?;
    let failed = results.iter().filter(|result| result.is_none()).count();
    Ok((sink, failed))
}

fn read_papers_table(path: &Path) -> Result<Vec<PaperRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open papers table: {}", path.display()))?;
    let mut papers = Vec::new();
    for (index, row) in reader.deserialize::<PaperCsvRow>().enumerate() {
        let row = row.with_context(|| {
            format!("Failed to parse papers table row {} in {}", index + 2, path.display())
        })?;
        let author_ids = decode_id_list(&row.author_ids).with_context(|| {
            format!(
                "Malformed author_ids for paper {} (row {} in {})",
                row.id,
                index + 2,
                path.display()
            )
        })?;
        papers.push(PaperRecord {
            id: row.id,
            publication_year: row.publication_year,
            cited_by_count: row.cited_by_count,
            title: row.title,
            author_ids,
            abstract_inverted_index: row
                .abstract_inverted_index
                .filter(|cell| !cell.trim().is_empty()),
        });
    }
    Ok(papers)
}

fn read_authors_table(path: &Path) -> Result<Vec<AuthorRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open authors table: {}", path.display()))?;
    let mut authors = Vec::new();
    for (index, row) in reader.deserialize::<AuthorRecord>().enumerate() {
        authors.push(row.with_context(|| {
            format!("Failed to parse authors table row {} in {}", index + 2, path.display())
        })?);
    }
    Ok(authors)
}

fn read_abstracts_table(path: &Path) -> Result<Vec<AbstractRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open abstracts table: {}", path.display()))?;
    let mut abstracts = Vec::new();
    for (index, row) in reader.deserialize::<AbstractRecord>().enumerate() {
        abstracts.push(row.with_context(|| {
            format!("Failed to parse abstracts table row {} in {}", index + 2, path.display())
        })?);
    }
    Ok(abstracts)
}

fn write_authors_table(path: &Path, authors: &[AuthorRecord]) -> Result<usize> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = MergeWriter::new(file, &AUTHOR_TABLE_HEADERS)?;
    for author in authors {
        writer.write_row(&author.id, &author_fields(author))?;
    }
    writer.flush()?;
    Ok(writer.rows_written)
}

fn phase_progress_bar(len: u64) -> ProgressBar {
    let progress = ProgressBar::new(len);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec}) {msg}")
            .expect("Failed to create progress bar template")
            .progress_chars("=> "),
    );
    progress
}

fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}.{:03}s", seconds, elapsed.subsec_millis())
    }
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_uppercase().as_str() {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to INFO.", cli.log_level);
            LevelFilter::Info
        }
    };
    SimpleLogger::new()
        .with_level(log_level)
        .with_timestamp_format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .init()?;

    info!("Starting Co-Author Corpus Expander");
    info!(
        "Run timestamp: {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("Failed to create output directory: {}", cli.output.display()))?;
    info!("Output directory: {}", cli.output.display());

    let seed_papers = read_papers_table(&cli.papers)?;
    let seed_authors = read_authors_table(&cli.authors)?;
    let seed_abstracts = match &cli.abstracts {
        Some(path) => read_abstracts_table(path)?,
        None => Vec::new(),
    };
    info!(
        "Seed tables loaded: {} papers, {} authors, {} abstracts",
        seed_papers.len(),
        seed_authors.len(),
        seed_abstracts.len()
    );

    let known_author_ids: HashSet<String> =
        seed_authors.iter().map(|author| author.id.clone()).collect();
    let mut frontier: Vec<String> = co_author_frontier(&seed_papers, &known_author_ids)
        .into_iter()
        .collect();
    frontier.sort();
    info!("Co-author frontier: {} identifiers", frontier.len());
    if frontier.is_empty() {
        warn!("Co-author frontier is empty; the final tables will only contain the seed rows.");
    }

    let workers = if cli.workers == 0 {
        let cores = num_cpus::get();
        info!("Auto-detected {} CPU cores. Using {} workers.", cores, cores);
        cores
    } else {
        cli.workers
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Failed to build worker pool")?;

    let stats = Arc::new(FetchStats::new());
    let retry = RetryPolicy {
        max_attempts: cli.retry_attempts.max(1),
        base_delay: Duration::from_millis(cli.retry_delay_ms),
    };
    let client = OpenAlexClient::new(
        cli.api_base.trim_end_matches('/').to_string(),
        cli.min_citations,
        retry,
        Arc::clone(&stats),
    )?;

    let co_authors_path = cli.output.join("co_authors.csv");
    let mut profile_phase_counts: Option<(usize, usize)> = None;
    let co_authors: Vec<AuthorRecord> = if co_authors_path.is_file() {
        info!(
            "Co-author table {} already exists. Skipping profile fetch phase.",
            co_authors_path.display()
        );
        read_authors_table(&co_authors_path)?
    } else {
        info!("Fetching profiles for {} co-author identifiers...", frontier.len());
        let progress = phase_progress_bar(frontier.len() as u64);
        let results = run_pool(&pool, &frontier, |author_id| {
            let record = fetch_co_author_profile(&client, author_id);
            progress.inc(1);
            record
        });
        let unavailable = results.iter().filter(|result| result.is_none()).count();
        progress.finish_with_message(format!("Profiles fetched ({} unavailable)", unavailable));
        let fetched: Vec<AuthorRecord> = results.into_iter().flatten().collect();
        profile_phase_counts = Some((fetched.len(), unavailable));
        let accepted: Vec<AuthorRecord> = fetched
            .into_iter()
            .filter(|record| within_works_band(record, cli.min_works, cli.max_works))
            .collect();
        info!(
            "{} co-authors fall within the works-count band [{}, {}]",
            accepted.len(),
            cli.min_works,
            cli.max_works
        );
        let written = write_authors_table(&co_authors_path, &accepted)?;
        debug!("Wrote {} rows to {}", written, co_authors_path.display());
        accepted
    };

    let harvest_ids: Vec<String> = co_authors.iter().map(|record| record.id.clone()).collect();
    info!("Harvesting filtered works for {} co-authors...", harvest_ids.len());

    let papers_path = cli.output.join("final_papers.csv");
    let abstracts_path = cli.output.join("final_abstracts.csv");
    let mut sink = HarvestSink::new(
        File::create(&papers_path)
            .with_context(|| format!("Failed to create {}", papers_path.display()))?,
        File::create(&abstracts_path)
            .with_context(|| format!("Failed to create {}", abstracts_path.display()))?,
    )?;
    sink.seed(&seed_papers, &seed_abstracts)?;

    let progress = phase_progress_bar(harvest_ids.len() as u64);
    let (sink, failed_workers) =
        run_harvest_phase(&client, &pool, &harvest_ids, sink, &stats, &progress)?;
    progress.finish_with_message("Work harvest complete");
    let (paper_rows, abstract_rows) = sink.rows_written();

    let final_authors_path = cli.output.join("final_authors.csv");
    let final_authors = merge_by_id(vec![seed_authors, co_authors]);
    let author_rows = write_authors_table(&final_authors_path, &final_authors)?;

    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(start_time.elapsed()));
    info!("Co-author frontier size: {}", frontier.len());
    if let Some((fetched, unavailable)) = profile_phase_counts {
        info!("Co-author profiles: {} fetched, {} unavailable", fetched, unavailable);
    }
    info!(
        "Co-authors harvested: {} ({} worker failures)",
        harvest_ids.len(),
        failed_workers
    );
    info!(
        "Works pages fetched: {} ({} authors stopped on a failed page)",
        stats.pages_fetched.load(Ordering::Relaxed),
        stats.page_failures.load(Ordering::Relaxed)
    );
    let failures = stats.remote_failure_counts();
    if !failures.is_empty() {
        info!("Remote failures by status:");
        for (status, count) in failures {
            info!("  - HTTP {}: {}", status, count);
        }
    }
    info!("Rows written:");
    info!("  - {}: {}", final_authors_path.display(), author_rows);
    info!("  - {}: {}", papers_path.display(), paper_rows);
    info!("  - {}: {}", abstracts_path.display(), abstract_rows);
    info!("-------------------------------------------------------");

    Ok(())
}
