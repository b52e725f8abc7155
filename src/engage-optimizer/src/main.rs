//! Engage Optimizer: experiment manager and content-strategy bandit for
//! social media campaigns.
//!
//! Wires the subsystems together and drives them with simulated traffic:
//! a two-variant experiment and a stream of content tasks whose engagement
//! is fed back to the bandit through the ingestor.

use clap::Parser;
use engage_agents::{
    ContentTask, EngagementIngestor, EngagementReport, OptimizationAgent, RuleBasedContentService,
};
use engage_cache::RedisBanditStore;
use engage_core::config::EngineConfig;
use engage_core::store::BanditStore;
use engage_core::types::{
    ContentType, EngagementMetrics, NewExperiment, OutcomeSample, Platform, PostMetrics,
    TargetMetric, Variant,
};
use engage_experimentation::{ExperimentManager, MemoryExperimentStore};
use engage_rl_engine::arms::{
    ENGAGEMENT_HOOK, HASHTAG_OPTIMIZATION, LENGTH_OPTIMIZATION, TIMING_OPTIMIZATION,
    VISUAL_ENHANCEMENT,
};
use engage_rl_engine::{ContextualBandit, MemoryBanditStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "engage-optimizer")]
#[command(about = "Bayesian A/B testing and contextual bandit optimization for social content")]
#[command(version)]
struct Cli {
    /// Simulated subjects / content tasks
    #[arg(long, default_value_t = 500)]
    rounds: usize,

    /// Seed for the simulation and the engines' samplers
    #[arg(long, env = "ENGAGE_OPTIMIZER__SEED")]
    seed: Option<u64>,

    /// Persist bandit state to Redis (falls back to memory if unreachable)
    #[arg(long, default_value_t = false)]
    redis: bool,

    /// Expose Prometheus metrics on this port
    #[arg(long, env = "ENGAGE_OPTIMIZER__METRICS_PORT")]
    metrics_port: Option<u16>,
}

fn start_metrics(port: u16) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()?;
    info!(port = port, "Metrics exporter started");
    Ok(())
}

fn bandit_store(config: &EngineConfig, use_redis: bool) -> Arc<dyn BanditStore> {
    if use_redis {
        match RedisBanditStore::new(&config.redis) {
            Ok(store) => return Arc::new(store),
            Err(e) => error!(error = %e, "Failed to connect to Redis, bandit state stays in memory"),
        }
    }
    Arc::new(MemoryBanditStore::new())
}

/// Mean engagement quality each strategy produces in the simulation.
fn simulated_quality(arm_id: &str) -> f64 {
    match arm_id {
        VISUAL_ENHANCEMENT => 0.55,
        ENGAGEMENT_HOOK => 0.45,
        HASHTAG_OPTIMIZATION => 0.35,
        TIMING_OPTIMIZATION => 0.30,
        LENGTH_OPTIMIZATION => 0.25,
        _ => 0.2,
    }
}

fn simulated_engagement(rng: &mut StdRng, arm_id: &str) -> EngagementMetrics {
    let quality = simulated_quality(arm_id) * (0.5 + rng.gen::<f64>());
    EngagementMetrics {
        likes: quality * 800.0,
        comments: quality * 60.0,
        shares: quality * 30.0,
        click_through_rate: quality * 0.04,
        reach_rate: quality * 0.4,
    }
}

fn run_experiment(manager: &ExperimentManager, rounds: usize, rng: &mut StdRng) -> anyhow::Result<()> {
    let experiment = manager.create_experiment(NewExperiment {
        name: "Thumbnail style".into(),
        description: "Bold versus minimal thumbnails on launch posts".into(),
        platform: Platform::Youtube,
        owner_id: Some("growth-team".into()),
        variants: vec![
            Variant::new("bold", "Bold thumbnail", 50.0),
            Variant::new("minimal", "Minimal thumbnail", 50.0),
        ],
        target_metric: TargetMetric::Likes,
        min_sample_size: 30,
        confidence_level: 0.95,
        prior: None,
    })?;
    manager.start_experiment(experiment.id)?;

    for i in 0..rounds {
        let subject = format!("user-{i}");
        let Some(variant) = manager.assign_subject(experiment.id, &subject) else {
            continue;
        };
        let rate = if variant.id == "bold" { 0.14 } else { 0.08 };
        let liked = rng.gen::<f64>() < rate;
        manager.record_outcome(
            experiment.id,
            &variant.id,
            OutcomeSample {
                subject_id: subject,
                metrics: PostMetrics {
                    likes: if liked { 1.0 } else { 0.0 },
                    views: 1.0,
                    ..Default::default()
                },
                metadata: serde_json::json!({ "source": "simulation" }),
            },
        )?;
    }

    match manager.analyze(experiment.id) {
        Some(analysis) => {
            info!(
                experiment_id = %experiment.id,
                status = ?analysis.status,
                winner = ?analysis.winning_variant,
                "Experiment analyzed"
            );
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        None => warn!(experiment_id = %experiment.id, "Experiment disappeared before analysis"),
    }
    Ok(())
}

async fn run_bandit(
    agent: Arc<OptimizationAgent>,
    buffer: usize,
    rounds: usize,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let (ingestor, worker) = EngagementIngestor::spawn(agent.clone(), buffer);

    for i in 0..rounds {
        let task_id = format!("post-{i}");
        let task = ContentTask {
            platform: Platform::ALL[rng.gen_range(0..Platform::ALL.len())],
            content_type: ContentType::ALL[rng.gen_range(0..ContentType::ALL.len())],
            text: format!("Launch update #{i}: new features are live"),
            audience_segment: ["developers", "marketers", "founders"][i % 3].to_string(),
            historical_engagement: rng.gen_range(0.0..0.1),
            has_thumbnail: rng.gen_bool(0.3),
            scheduled_at: None,
            subject_id: None,
        };

        let result = match agent.optimize_content(&task_id, &task) {
            Ok(result) => result,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Optimization failed");
                continue;
            }
        };
        let metrics = simulated_engagement(rng, &result.arm_id);
        ingestor
            .submit(EngagementReport {
                content_id: task_id,
                metrics,
                context: None,
                arm_id: None,
            })
            .await?;
    }

    drop(ingestor);
    let applied = worker.await?;
    info!(applied = applied, pending = agent.pending_count(), "Engagement ingestion finished");
    println!("{}", serde_json::to_string_pretty(&agent.bandit().arm_stats())?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "engage_optimizer=info,engage_experimentation=info,engage_rl_engine=info,engage_agents=info"
                    .into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();
    info!("Engage Optimizer starting up");

    let config = EngineConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    if let Some(port) = cli.metrics_port {
        if let Err(e) = start_metrics(port) {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    let seed = cli.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    info!(seed = seed, rounds = cli.rounds, "Simulation configured");

    let manager = ExperimentManager::with_seed(
        Arc::new(MemoryExperimentStore::new()),
        &config.experiments,
        seed,
    );
    run_experiment(&manager, cli.rounds, &mut rng)?;

    // Store connect and state restore are blocking I/O.
    let bandit_config = config.clone();
    let use_redis = cli.redis;
    let bandit = tokio::task::spawn_blocking(move || {
        let bandit = ContextualBandit::with_seed(
            bandit_config.bandit.clone(),
            bandit_store(&bandit_config, use_redis),
            seed.wrapping_add(1),
        );
        let arms = bandit.initialize();
        info!(arms = arms, "Contextual bandit ready");
        bandit
    })
    .await?;

    let agent = Arc::new(OptimizationAgent::new(
        Arc::new(bandit),
        Arc::new(RuleBasedContentService),
        &config.agent,
    ));
    run_bandit(agent, config.agent.ingest_buffer, cli.rounds, &mut rng).await?;

    info!("Engage Optimizer finished");
    Ok(())
}
