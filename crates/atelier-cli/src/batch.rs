use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use atelier_contracts::configs::{ConfigResolver, PaintConfig};
use atelier_contracts::events::{EventLog, JobEvent};
use atelier_contracts::ledger::{CsvLedger, MetadataLedger};
use atelier_contracts::prompts::{
    InstructionStore, PromptTemplates, WildcardResolver, WildcardStore, WildcardTable,
};
use atelier_contracts::summary::{write_summary, BatchSummary, JobRecord};
use atelier_engine::{
    build_artist, build_brain, ArtistKind, BrainKind, Job, JobPipeline, JobReport,
    ServiceSpec, ServiceSupervisor,
};
use chrono::Local;
use tracing::{info, warn};
use uuid::Uuid;

use crate::settings::{PipelineKind, Settings};

/// Command-line choices layered over the loaded settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the batch to these niches; empty means every template.
    pub niches: Vec<String>,
    pub count: Option<u32>,
    pub ordered: bool,
}

struct NicheJob {
    name: String,
    template: String,
    config: PaintConfig,
}

/// Everything checked before the first job runs. Failing here aborts the batch.
struct BatchPlan {
    niches: Vec<NicheJob>,
    wildcards: WildcardTable,
    instructions: Option<InstructionStore>,
}

fn plan(settings: &Settings, options: &RunOptions) -> Result<BatchPlan> {
    let templates = PromptTemplates::open(settings.templates_path())?.templates()?;
    let selected: Vec<(String, String)> = if options.niches.is_empty() {
        templates
    } else {
        let mut by_name: BTreeMap<String, String> = templates.into_iter().collect();
        let requested: BTreeSet<&String> = options.niches.iter().collect();
        let mut picked = Vec::with_capacity(requested.len());
        for niche in requested {
            let Some(template) = by_name.remove(niche) else {
                bail!(
                    "no {} template named '{niche}' in {}",
                    settings.active_pipeline,
                    settings.templates_path().display()
                );
            };
            picked.push((niche.clone(), template));
        }
        picked
    };

    let (wildcards, instructions) = match settings.active_pipeline {
        PipelineKind::Wildcard => {
            let wildcards = WildcardStore::load(&settings.wildcards_path)?;
            let instructions = InstructionStore::load(&settings.instruction_path)?;
            if instructions.get(&settings.instruction).is_none() {
                bail!(
                    "instruction '{}' not found in {} (available: {})",
                    settings.instruction,
                    settings.instruction_path.display(),
                    instructions.names().join(", ")
                );
            }
            (wildcards, Some(instructions))
        }
        PipelineKind::Meta => {
            // Meta prompts may still carry tokens; wildcards are optional here.
            let wildcards = WildcardStore::load(&settings.wildcards_path).unwrap_or_default();
            (wildcards, None)
        }
    };

    let resolver = ConfigResolver::new(&settings.niche_configs_path);
    let mut niches = Vec::with_capacity(selected.len());
    for (name, template) in selected {
        let config = resolver.resolve(&name, &settings.paint)?;
        niches.push(NicheJob {
            name,
            template,
            config,
        });
    }

    Ok(BatchPlan {
        niches,
        wildcards,
        instructions,
    })
}

fn required_services(settings: &Settings) -> Vec<ServiceSpec> {
    let mut specs = Vec::new();
    if settings.active_brain == BrainKind::Ollama {
        specs.push(ServiceSpec::ollama(&settings.ollama.url));
    }
    if settings.active_artist == ArtistKind::Fooocus {
        specs.push(ServiceSpec::fooocus(&settings.fooocus.url, &settings.fooocus.path));
    }
    specs
}

fn job_record(job: &Job, report: &JobReport) -> JobRecord {
    let state = report.failed_during().unwrap_or_else(|| report.state());
    JobRecord {
        job_id: job.job_id.clone(),
        niche: job.niche.clone(),
        stem: job.name_stem.clone(),
        success: report.is_success(),
        state: state.as_str().to_string(),
        reason: report.failure().map(|failure| failure.to_string()),
        files: report
            .files
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect(),
    }
}

fn name_stem(niche: &str, index: u32) -> String {
    format!("{niche}_{index}_{}", Local::now().format("%m%d%H%M%S"))
}

fn emit(events: &EventLog, event: JobEvent) {
    if let Err(err) = events.emit(&event) {
        warn!("failed to append batch event: {err:#}");
    }
}

/// Runs niche × count jobs and writes `summary.json` under the log directory.
///
/// Only configuration problems found before the first job return an error; job failures are
/// recorded in the summary.
pub fn run_batch(settings: &Settings, options: &RunOptions) -> Result<BatchSummary> {
    let count = options.count.unwrap_or(settings.images_per_niche).max(1);
    let ordered = options.ordered || settings.wildcard_mode.is_ordered();
    let plan = plan(settings, options)?;

    let ledger = CsvLedger::new(&settings.csv_path, settings.ledger_layout());
    ledger
        .ensure_header()
        .with_context(|| format!("failed to prepare ledger {}", settings.csv_path.display()))?;

    let run_id = Uuid::new_v4().to_string();
    let events = EventLog::new(settings.log_path.join("events.jsonl"), run_id.clone());
    let brain = build_brain(settings.active_brain, &settings.brain_settings());
    let artist = build_artist(settings.active_artist, &settings.artist_settings());
    let mut pipeline = JobPipeline::new(
        brain,
        artist,
        ledger,
        WildcardResolver::new(plan.wildcards.clone()),
    )
    .with_metadata_extension(settings.metadata_image_extension.clone())
    .with_events(events.clone());
    if let Some(instructions) = plan.instructions {
        pipeline = pipeline.with_instructions(instructions);
    }
    let instruction = match settings.active_pipeline {
        PipelineKind::Wildcard => Some(settings.instruction.clone()),
        PipelineKind::Meta => None,
    };

    info!(
        run_id = %run_id,
        brain = %settings.active_brain,
        artist = %settings.active_artist,
        pipeline = %settings.active_pipeline,
        niches = plan.niches.len(),
        count,
        "batch started"
    );
    emit(
        &events,
        JobEvent::BatchStarted {
            niches: plan.niches.iter().map(|niche| niche.name.clone()).collect(),
            jobs_per_niche: count,
        },
    );

    let mut summary = BatchSummary::start(run_id);
    let supervisor = ServiceSupervisor::acquire(&required_services(settings))?;
    for niche in &plan.niches {
        let overrides = WildcardStore::load_override(&settings.wildcards_path, &niche.name);
        pipeline
            .resolver_mut()
            .activate(&niche.name, WildcardStore::merge(&plan.wildcards, &overrides));

        for index in 1..=count {
            let job = Job {
                job_id: Uuid::new_v4().to_string(),
                niche: niche.name.clone(),
                template: niche.template.clone(),
                instruction: instruction.clone(),
                name_stem: name_stem(&niche.name, index),
                ordered,
                config: niche.config.clone(),
            };
            let report = pipeline.run(&job);
            summary.record(job_record(&job, &report));
        }
    }
    supervisor.release();

    summary.finish();
    emit(
        &events,
        JobEvent::BatchFinished {
            succeeded: summary.succeeded(),
            failed: summary.failed(),
        },
    );
    let summary_path = settings.log_path.join("summary.json");
    write_summary(&summary_path, &summary)
        .with_context(|| format!("failed to write {}", summary_path.display()))?;
    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        summary = %summary_path.display(),
        "batch finished"
    );
    Ok(summary)
}

/// Exit code for a finished batch: non-zero only when every job failed.
pub fn exit_code(summary: &BatchSummary) -> i32 {
    if summary.total() > 0 && summary.succeeded() == 0 {
        1
    } else {
        0
    }
}

/// Resolves `template` against the common wildcards plus the optional niche overrides.
pub fn resolver_for(wildcards_path: &Path, niche: Option<&str>) -> Result<WildcardResolver> {
    let base = WildcardStore::load(wildcards_path)?;
    let mut resolver = WildcardResolver::new(base.clone());
    if let Some(niche) = niche {
        let overrides = WildcardStore::load_override(wildcards_path, niche);
        resolver.activate(niche, WildcardStore::merge(&base, &overrides));
    }
    Ok(resolver)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use atelier_engine::{ArtistKind, BrainKind};
    use serde_json::Value;

    use super::{exit_code, resolver_for, run_batch, RunOptions};
    use crate::settings::{PipelineKind, Settings};

    fn write(path: &Path, text: &str) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        Ok(())
    }

    fn offline_settings(root: &Path) -> anyhow::Result<Settings> {
        let prompts = root.join("prompts");
        write(&prompts.join("wildcards").join("animal.txt"), "fox\nowl\n")?;
        write(&prompts.join("wildcards").join("forest").join("animal.txt"), "deer\n")?;
        write(
            &prompts.join("wildcard_prompts").join("forest.txt"),
            "a __animal__ among pines",
        )?;
        write(
            &prompts.join("wildcard_prompts").join("city.txt"),
            "a __animal__ on a rooftop",
        )?;
        write(
            &prompts.join("instructions").join("default.txt"),
            "Return a JSON idea for:",
        )?;
        write(
            &prompts.join("niche_configs").join("default.json"),
            r#"{"N_images": 2, "image_size": "4*4"}"#,
        )?;

        let mut settings = Settings {
            active_brain: BrainKind::Dryrun,
            active_artist: ArtistKind::Dryrun,
            active_pipeline: PipelineKind::Wildcard,
            images_per_niche: 2,
            csv_path: root.join("metadata.csv"),
            wildcards_path: prompts.join("wildcards"),
            wildcard_prompts_path: prompts.join("wildcard_prompts"),
            niche_configs_path: prompts.join("niche_configs"),
            instruction_path: prompts.join("instructions"),
            log_path: root.join("log"),
            ..Settings::default()
        };
        settings.paint.output_dir = Some(root.join("images"));
        Ok(settings)
    }

    #[test]
    fn offline_batch_runs_every_niche() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let settings = offline_settings(temp.path())?;

        let summary = run_batch(&settings, &RunOptions::default())?;
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.succeeded(), 4);
        assert_eq!(exit_code(&summary), 0);
        let niches: Vec<&str> = summary.jobs.iter().map(|job| job.niche.as_str()).collect();
        assert_eq!(niches, vec!["city", "city", "forest", "forest"]);

        // Header plus two rows per job.
        let ledger = fs::read_to_string(temp.path().join("metadata.csv"))?;
        assert_eq!(ledger.lines().count(), 1 + 4 * 2);
        assert!(ledger.starts_with("Filename,Title,Keywords,Category,Releases"));

        let images = fs::read_dir(temp.path().join("images"))?.count();
        assert_eq!(images, 8);

        let written: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("log/summary.json"))?)?;
        assert_eq!(written["succeeded"], Value::from(4));
        let events = fs::read_to_string(temp.path().join("log/events.jsonl"))?;
        assert!(events.lines().next().unwrap_or("").contains("batch_started"));
        assert!(events.lines().last().unwrap_or("").contains("batch_finished"));
        Ok(())
    }

    #[test]
    fn niche_filter_and_count_override() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let settings = offline_settings(temp.path())?;
        let options = RunOptions {
            niches: vec!["forest".to_string()],
            count: Some(1),
            ordered: true,
        };

        let summary = run_batch(&settings, &options)?;
        assert_eq!(summary.total(), 1);
        assert!(summary.jobs[0].stem.starts_with("forest_1_"));
        Ok(())
    }

    #[test]
    fn configuration_errors_abort_before_any_job() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut settings = offline_settings(temp.path())?;

        settings.instruction = "missing".to_string();
        let err = run_batch(&settings, &RunOptions::default()).unwrap_err();
        assert!(err.to_string().contains("instruction 'missing' not found"));

        settings.instruction = "default".to_string();
        let options = RunOptions {
            niches: vec!["ocean".to_string()],
            ..RunOptions::default()
        };
        assert!(run_batch(&settings, &options).is_err());
        assert!(!temp.path().join("metadata.csv").exists());
        Ok(())
    }

    #[test]
    fn failing_niche_does_not_stop_the_batch() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut settings = offline_settings(temp.path())?;
        let prompts = temp.path().join("prompts");
        // A blank template under a bare instruction leaves the brain nothing to work with.
        write(&prompts.join("wildcard_prompts").join("blank.txt"), "  \n")?;
        write(&prompts.join("instructions").join("bare.txt"), "{prompt}")?;
        settings.instruction = "bare".to_string();
        let options = RunOptions {
            niches: vec!["blank".to_string(), "forest".to_string()],
            count: Some(2),
            ordered: false,
        };

        let summary = run_batch(&settings, &options)?;
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(exit_code(&summary), 0);
        for job in &summary.jobs {
            if job.niche == "blank" {
                assert!(!job.success);
                assert_eq!(job.state, "brainstorming");
                assert!(job
                    .reason
                    .as_deref()
                    .unwrap_or("")
                    .contains("empty instruction"));
            } else {
                assert!(job.success);
            }
        }

        let ledger = fs::read_to_string(temp.path().join("metadata.csv"))?;
        assert_eq!(ledger.lines().count(), 1 + 2 * 2);
        let written: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("log/summary.json"))?)?;
        assert_eq!(written["failed"], Value::from(2));
        assert_eq!(written["succeeded"], Value::from(2));
        Ok(())
    }

    #[test]
    fn niche_resolver_uses_overrides() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let settings = offline_settings(temp.path())?;

        let mut resolver = resolver_for(&settings.wildcards_path, Some("forest"))?;
        for _ in 0..10 {
            assert_eq!(resolver.resolve("__animal__", false).text, "deer");
        }
        Ok(())
    }
}
