use std::fmt;
use std::path::PathBuf;

use atelier_contracts::configs::PaintConfig;
use atelier_contracts::errors::CollaboratorFailure;
use atelier_contracts::events::{EventLog, JobEvent};
use atelier_contracts::filenames::{output_stems, with_extension};
use atelier_contracts::ideas::Idea;
use atelier_contracts::ledger::{LedgerRow, MetadataLedger};
use atelier_contracts::prompts::{compose, InstructionStore, ResolveWarning, WildcardResolver};
use tracing::{debug, info, warn};

use crate::artists::Artist;
use crate::brains::Brain;
use crate::error::JobFailure;

/// One unit of work: a template to resolve and the paint settings to render it with.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub niche: String,
    pub template: String,
    /// Instruction template wrapped around the resolved prompt. `None` sends the resolved
    /// template to the brain as-is (meta prompts are complete instructions already).
    pub instruction: Option<String>,
    pub name_stem: String,
    pub ordered: bool,
    pub config: PaintConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Brainstorming,
    Painting,
    LoggingMetadata,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Brainstorming => "brainstorming",
            Self::Painting => "painting",
            Self::LoggingMetadata => "logging_metadata",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Success,
    Failure(JobFailure),
}

/// Everything observed while running one job.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: String,
    pub outcome: JobOutcome,
    /// Every state entered, starting with `Idle`.
    pub states: Vec<JobState>,
    pub warnings: Vec<ResolveWarning>,
    pub resolved_prompt: Option<String>,
    pub idea: Option<Idea>,
    /// Files the artist reported; kept even when metadata logging fails.
    pub files: Vec<PathBuf>,
    /// Ledger filenames written, in order.
    pub rows: Vec<String>,
}

impl JobReport {
    fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            outcome: JobOutcome::Success,
            states: vec![JobState::Idle],
            warnings: Vec::new(),
            resolved_prompt: None,
            idea: None,
            files: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Success)
    }

    pub fn state(&self) -> JobState {
        self.states.last().copied().unwrap_or(JobState::Idle)
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.outcome {
            JobOutcome::Success => None,
            JobOutcome::Failure(failure) => Some(failure),
        }
    }

    /// State the job was in when it failed.
    pub fn failed_during(&self) -> Option<JobState> {
        if !matches!(self.state(), JobState::Failed) {
            return None;
        }
        self.states.iter().rev().nth(1).copied()
    }
}

/// Runs jobs through brain, artist and ledger. Never returns an error: every outcome is
/// reported through [`JobReport`].
pub struct JobPipeline<B, A, L> {
    brain: B,
    artist: A,
    ledger: L,
    resolver: WildcardResolver,
    instructions: Option<InstructionStore>,
    metadata_extension: String,
    events: Option<EventLog>,
}

impl<B, A, L> JobPipeline<B, A, L>
where
    B: Brain,
    A: Artist,
    L: MetadataLedger,
{
    pub fn new(brain: B, artist: A, ledger: L, resolver: WildcardResolver) -> Self {
        Self {
            brain,
            artist,
            ledger,
            resolver,
            instructions: None,
            metadata_extension: "jpg".to_string(),
            events: None,
        }
    }

    pub fn with_instructions(mut self, instructions: InstructionStore) -> Self {
        self.instructions = Some(instructions);
        self
    }

    /// Extension used for ledger filenames, independent of what the artist wrote.
    pub fn with_metadata_extension(mut self, extension: impl Into<String>) -> Self {
        self.metadata_extension = extension.into();
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn brain(&self) -> &B {
        &self.brain
    }

    pub fn artist(&self) -> &A {
        &self.artist
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn resolver(&self) -> &WildcardResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut WildcardResolver {
        &mut self.resolver
    }

    pub fn instructions(&self) -> Option<&InstructionStore> {
        self.instructions.as_ref()
    }

    pub fn run(&mut self, job: &Job) -> JobReport {
        let mut report = JobReport::new(&job.job_id);
        info!(job_id = %job.job_id, niche = %job.niche, stem = %job.name_stem, "job started");
        self.emit(JobEvent::JobStarted {
            job_id: job.job_id.clone(),
            niche: job.niche.clone(),
            stem: job.name_stem.clone(),
        });

        self.enter(&mut report, JobState::Brainstorming);
        let resolution = self.resolver.resolve(&job.template, job.ordered);
        report.warnings = resolution.warnings;
        let instruction = match &job.instruction {
            Some(name) => match self.instructions.as_ref().and_then(|store| store.get(name)) {
                Some(text) => compose(text, &resolution.text),
                None => {
                    return self.fail(report, JobFailure::InstructionMissing(name.clone()));
                }
            },
            None => resolution.text.clone(),
        };
        debug!(job_id = %job.job_id, resolved = %resolution.text, "prompt resolved");
        report.resolved_prompt = Some(resolution.text);

        let idea = match self.brain.get_idea(&instruction) {
            Ok(idea) => idea,
            Err(failure) => return self.fail(report, JobFailure::Idea(failure)),
        };
        info!(job_id = %job.job_id, title = %idea.title, "idea received");
        report.idea = Some(idea.clone());

        self.enter(&mut report, JobState::Painting);
        let requested = job.config.n_images();
        let files = match self.artist.paint(&idea.prompt, &job.name_stem, &job.config) {
            Ok(files) => files,
            Err(failure) => return self.fail(report, JobFailure::Image(failure)),
        };
        let produced = files.len();
        report.files = files;
        if produced < requested as usize {
            let failure = CollaboratorFailure::new(format!(
                "{} produced {produced} of {requested} requested images",
                self.artist.name()
            ));
            return self.fail(report, JobFailure::Image(failure));
        }

        self.enter(&mut report, JobState::LoggingMetadata);
        for stem in output_stems(&job.name_stem, requested) {
            let filename = with_extension(&stem, &self.metadata_extension);
            let row = LedgerRow::from_idea(&idea, filename.clone());
            if let Err(err) = self.ledger.append(&row) {
                return self.fail(report, JobFailure::Metadata(err));
            }
            report.rows.push(filename);
        }

        self.enter(&mut report, JobState::Done);
        info!(job_id = %job.job_id, images = produced, "job done");
        self.emit(JobEvent::JobFinished {
            job_id: report.job_id.clone(),
            success: true,
            reason: None,
            files: display_paths(&report.files),
        });
        report
    }

    fn enter(&self, report: &mut JobReport, state: JobState) {
        debug!(job_id = %report.job_id, from = %report.state(), to = %state, "job transition");
        report.states.push(state);
        self.emit(JobEvent::JobState {
            job_id: report.job_id.clone(),
            state: state.as_str().to_string(),
        });
    }

    fn fail(&self, mut report: JobReport, failure: JobFailure) -> JobReport {
        let during = report.state();
        warn!(job_id = %report.job_id, state = %during, "job failed: {failure}");
        self.enter(&mut report, JobState::Failed);
        self.emit(JobEvent::JobFinished {
            job_id: report.job_id.clone(),
            success: false,
            reason: Some(failure.to_string()),
            files: display_paths(&report.files),
        });
        report.outcome = JobOutcome::Failure(failure);
        report
    }

    fn emit(&self, event: JobEvent) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(&event) {
            warn!("failed to append job event: {err:#}");
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use atelier_contracts::configs::PaintConfig;
    use atelier_contracts::errors::{CollaboratorFailure, LedgerError};
    use atelier_contracts::events::EventLog;
    use atelier_contracts::filenames::output_stems;
    use atelier_contracts::ideas::Idea;
    use atelier_contracts::ledger::{LedgerRow, MetadataLedger};
    use atelier_contracts::prompts::{InstructionStore, WildcardResolver, WildcardTable};
    use serde_json::Value;

    use super::{Job, JobPipeline, JobState};
    use crate::artists::Artist;
    use crate::brains::Brain;
    use crate::error::JobFailure;

    struct StubBrain {
        fail: bool,
        instructions: Mutex<Vec<String>>,
    }

    impl StubBrain {
        fn ok() -> Self {
            Self {
                fail: false,
                instructions: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.instructions.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    impl Brain for StubBrain {
        fn name(&self) -> &str {
            "stub"
        }

        fn get_idea(&self, instruction: &str) -> Result<Idea, CollaboratorFailure> {
            if let Ok(mut calls) = self.instructions.lock() {
                calls.push(instruction.to_string());
            }
            if self.fail {
                return Err(CollaboratorFailure::new("model offline"));
            }
            Ok(Idea {
                prompt: "a fox in the snow".to_string(),
                title: "Snow Fox".to_string(),
                keywords: "fox,snow".to_string(),
                category: 8,
            })
        }
    }

    /// Returns one path per requested image, or `short_by` fewer.
    struct StubArtist {
        fail: bool,
        short_by: usize,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl StubArtist {
        fn ok() -> Self {
            Self {
                fail: false,
                short_by: 0,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
        }
    }

    impl Artist for StubArtist {
        fn name(&self) -> &str {
            "stub"
        }

        fn paint(
            &self,
            prompt: &str,
            name_stem: &str,
            config: &PaintConfig,
        ) -> Result<Vec<PathBuf>, CollaboratorFailure> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((prompt.to_string(), name_stem.to_string()));
            }
            if self.fail {
                return Err(CollaboratorFailure::new("gpu on fire"));
            }
            let stems = output_stems(name_stem, config.n_images());
            let keep = stems.len().saturating_sub(self.short_by);
            Ok(stems
                .into_iter()
                .take(keep)
                .map(|stem| Path::new("/tmp/out").join(format!("{stem}.png")))
                .collect())
        }
    }

    #[derive(Default)]
    struct MemoryLedger {
        fail: bool,
        rows: Mutex<Vec<LedgerRow>>,
    }

    impl MemoryLedger {
        fn rows(&self) -> Vec<LedgerRow> {
            self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
        }
    }

    impl MetadataLedger for MemoryLedger {
        fn ensure_header(&self) -> Result<(), LedgerError> {
            Ok(())
        }

        fn append(&self, row: &LedgerRow) -> Result<(), LedgerError> {
            if self.fail {
                return Err(LedgerError::Io {
                    path: PathBuf::from("metadata.csv"),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            if let Ok(mut rows) = self.rows.lock() {
                rows.push(row.clone());
            }
            Ok(())
        }
    }

    fn table() -> WildcardTable {
        [("animal", vec!["fox".to_string()])].into_iter().collect()
    }

    fn job(n_images: u32) -> Job {
        Job {
            job_id: "job-1".to_string(),
            niche: "animals".to_string(),
            template: "a __animal__ at dawn".to_string(),
            instruction: None,
            name_stem: "animals_1_0501120000".to_string(),
            ordered: false,
            config: PaintConfig {
                n_images: Some(n_images),
                ..PaintConfig::default()
            },
        }
    }

    fn pipeline(
        brain: StubBrain,
        artist: StubArtist,
        ledger: MemoryLedger,
    ) -> JobPipeline<StubBrain, StubArtist, MemoryLedger> {
        JobPipeline::new(brain, artist, ledger, WildcardResolver::with_seed(table(), 7))
    }

    #[test]
    fn brain_failure_skips_artist_and_ledger() {
        let mut pipeline = pipeline(
            StubBrain::failing(),
            StubArtist::ok(),
            MemoryLedger::default(),
        );
        let report = pipeline.run(&job(1));

        assert!(!report.is_success());
        assert_eq!(report.state(), JobState::Failed);
        assert_eq!(report.failed_during(), Some(JobState::Brainstorming));
        assert!(matches!(report.failure(), Some(JobFailure::Idea(_))));
        assert!(report
            .failure()
            .map(|failure| failure.to_string().starts_with("idea generation failed"))
            .unwrap_or(false));
        assert_eq!(pipeline.brain().calls().len(), 1);
        assert_eq!(pipeline.artist().call_count(), 0);
        assert!(pipeline.ledger().rows().is_empty());
    }

    #[test]
    fn artist_failure_writes_no_rows() {
        let mut pipeline = pipeline(
            StubBrain::ok(),
            StubArtist::failing(),
            MemoryLedger::default(),
        );
        let report = pipeline.run(&job(2));

        assert!(!report.is_success());
        assert_eq!(report.failed_during(), Some(JobState::Painting));
        assert!(report
            .failure()
            .map(|failure| failure.to_string().starts_with("image generation failed"))
            .unwrap_or(false));
        assert_eq!(pipeline.artist().call_count(), 1);
        assert!(pipeline.ledger().rows().is_empty());
    }

    #[test]
    fn short_artist_output_counts_as_image_failure() {
        let artist = StubArtist {
            short_by: 1,
            ..StubArtist::ok()
        };
        let mut pipeline = pipeline(StubBrain::ok(), artist, MemoryLedger::default());
        let report = pipeline.run(&job(3));

        assert!(matches!(report.failure(), Some(JobFailure::Image(_))));
        assert_eq!(report.files.len(), 2);
        assert!(pipeline.ledger().rows().is_empty());
    }

    #[test]
    fn success_writes_one_row_per_image() {
        let mut pipeline = pipeline(StubBrain::ok(), StubArtist::ok(), MemoryLedger::default());
        let report = pipeline.run(&job(3));

        assert!(report.is_success());
        assert_eq!(
            report.states,
            vec![
                JobState::Idle,
                JobState::Brainstorming,
                JobState::Painting,
                JobState::LoggingMetadata,
                JobState::Done,
            ]
        );
        let filenames: Vec<String> = pipeline
            .ledger()
            .rows()
            .into_iter()
            .map(|row| row.filename)
            .collect();
        assert_eq!(
            filenames,
            vec![
                "animals_1_0501120000_1.jpg",
                "animals_1_0501120000_2.jpg",
                "animals_1_0501120000_3.jpg",
            ]
        );
        assert_eq!(report.rows, filenames);
        assert_eq!(pipeline.ledger().rows()[0].title, "Snow Fox");
        assert_eq!(pipeline.brain().calls(), vec!["a fox at dawn".to_string()]);
    }

    #[test]
    fn single_image_uses_bare_stem_and_custom_extension() {
        let mut pipeline = pipeline(StubBrain::ok(), StubArtist::ok(), MemoryLedger::default())
            .with_metadata_extension("png");
        let report = pipeline.run(&job(1));

        assert!(report.is_success());
        assert_eq!(report.rows, vec!["animals_1_0501120000.png".to_string()]);
    }

    #[test]
    fn ledger_failure_keeps_files() {
        let ledger = MemoryLedger {
            fail: true,
            ..MemoryLedger::default()
        };
        let mut pipeline = pipeline(StubBrain::ok(), StubArtist::ok(), ledger);
        let report = pipeline.run(&job(2));

        assert!(matches!(report.failure(), Some(JobFailure::Metadata(_))));
        assert_eq!(report.failed_during(), Some(JobState::LoggingMetadata));
        assert_eq!(report.files.len(), 2);
    }

    #[test]
    fn named_instruction_wraps_resolved_prompt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(
            temp.path().join("default.txt"),
            "Invent a stock photo idea for: {prompt}",
        )?;
        let store = InstructionStore::load(temp.path())?;

        let mut pipeline = pipeline(StubBrain::ok(), StubArtist::ok(), MemoryLedger::default())
            .with_instructions(store);
        let mut with_instruction = job(1);
        with_instruction.instruction = Some("default".to_string());
        assert!(pipeline.run(&with_instruction).is_success());
        assert_eq!(
            pipeline.brain().calls(),
            vec!["Invent a stock photo idea for: a fox at dawn".to_string()]
        );

        with_instruction.instruction = Some("missing".to_string());
        let report = pipeline.run(&with_instruction);
        assert!(matches!(report.failure(), Some(JobFailure::InstructionMissing(_))));
        assert_eq!(pipeline.brain().calls().len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_wildcards_are_reported_not_fatal() {
        let mut pipeline = pipeline(StubBrain::ok(), StubArtist::ok(), MemoryLedger::default());
        let mut typo = job(1);
        typo.template = "a __animl__ at dawn".to_string();
        let report = pipeline.run(&typo);

        assert!(report.is_success());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.resolved_prompt.as_deref(), Some("a  at dawn"));
    }

    #[test]
    fn events_trace_each_transition() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let mut pipeline = pipeline(StubBrain::ok(), StubArtist::failing(), MemoryLedger::default())
            .with_events(EventLog::new(&path, "run-1"));
        pipeline.run(&job(1));

        let rows: Vec<Value> = fs::read_to_string(&path)?
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let kinds: Vec<&str> = rows.iter().filter_map(|row| row["type"].as_str()).collect();
        assert_eq!(
            kinds,
            vec!["job_started", "job_state", "job_state", "job_state", "job_finished"]
        );
        let states: Vec<&str> = rows.iter().filter_map(|row| row["state"].as_str()).collect();
        assert_eq!(states, vec!["brainstorming", "painting", "failed"]);
        assert_eq!(rows[4]["success"], Value::Bool(false));
        Ok(())
    }
}
