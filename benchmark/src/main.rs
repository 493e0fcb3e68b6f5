use std::{
    collections::HashMap,
    num::{NonZeroU64, NonZeroUsize},
    ops::ControlFlow,
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use backends::{FileBackend, MemoryBackend};
use clap::Parser;
use crossbeam_utils::CachePadded;
use disk_io_job::{
    Config, DiskBackend, DiskBuffer, IoArgs, Job, JobMetrics, PieceIndex, Storage, StorageError,
    StorageId, Submitter, System, SystemHandle, WorkerPool,
};
use hdrhistogram::Counter;
use itertools::Itertools;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use serde_with::serde_as;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

mod backends;

/// Pieces per storage unit that clients pick from.
const PIECES_PER_STORAGE: u32 = 64;

#[derive(serde::Serialize, clap::Parser, Clone)]
struct Args {
    num_clients: NonZeroU64,
    num_storages: NonZeroU64,
    /// Read and write size; at most 15 since job buffers are u16-sized.
    block_size_shift: NonZeroU64,
    #[clap(long, default_value = "4")]
    workers: NonZeroUsize,
    #[clap(long, default_value = "until-ctrl-c")]
    run_duration: RunDuration,
    /// Share of writes among the piece jobs, in percent.
    #[clap(long, default_value_t = 50)]
    write_percent: u8,
    /// Share of hash jobs among the piece jobs, in percent.
    #[clap(long, default_value_t = 0)]
    hash_percent: u8,
    /// Every n-th job of a client is a `release_files` fence.
    #[clap(long)]
    fence_every: Option<NonZeroU64>,
    #[clap(subcommand)]
    backend: BackendKind,
}

#[derive(Clone, serde::Serialize)]
enum RunDuration {
    UntilCtrlC,
    FixedDuration(Duration),
    FixedTotalJobCount(u64),
    FixedPerClientJobCount(u64),
}

/// Parses `{n}[k-|m-|g-]{suffix}`, e.g. `10k-jobs-total`.
fn parse_job_count(s: &str, suffix: &str) -> Result<u64, String> {
    let stripped = &s[..s.len() - suffix.len()];
    let (stripped, multiplier) = if let Some(x) = stripped.strip_suffix("k-") {
        (x, 1000)
    } else if let Some(x) = stripped.strip_suffix("m-") {
        (x, 1000 * 1000)
    } else if let Some(x) = stripped.strip_suffix("g-") {
        (x, 1000 * 1000 * 1000)
    } else {
        (stripped, 1)
    };
    match stripped.parse::<NonZeroU64>() {
        Ok(n) => Ok(n.get() * multiplier),
        Err(e) => Err(format!("invalid job count: {e}: {s:?}")),
    }
}

impl FromStr for RunDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "until-ctrl-c" => Ok(RunDuration::UntilCtrlC),
            x if x.ends_with("jobs-total") => {
                parse_job_count(x, "jobs-total").map(RunDuration::FixedTotalJobCount)
            }
            x if x.ends_with("jobs-per-client") => {
                parse_job_count(x, "jobs-per-client").map(RunDuration::FixedPerClientJobCount)
            }
            x => match humantime::parse_duration(x) {
                Ok(d) => Ok(RunDuration::FixedDuration(d)),
                Err(e) => Err(format!("invalid duration: {e}: {s:?}")),
            },
        }
    }
}

#[derive(Clone, clap::Subcommand, serde::Serialize)]
enum BackendKind {
    /// Pieces live in a hash map; measures the job system alone.
    Memory,
    /// One file per piece below `dir/storage_{n}`.
    Files { dir: PathBuf },
}

struct StatsState {
    jobs_in_last_second: Vec<CachePadded<AtomicU64>>,
    latencies_histo: Vec<CachePadded<Mutex<hdrhistogram::Histogram<u64>>>>,
}

impl StatsState {
    fn make_latency_histogram() -> hdrhistogram::Histogram<u64> {
        hdrhistogram::Histogram::new_with_bounds(1, 1_000_000_000, 3).unwrap()
    }
    fn record_job_latency(&self, client_num: usize, latency: Duration) {
        let mut h = self.latencies_histo[client_num].lock().unwrap();
        h.record(u64::try_from(latency.as_nanos()).unwrap())
            .unwrap();
    }
}

struct RunResult {
    client_run_times: Vec<Duration>,
    metrics: JobMetrics,
}

#[derive(serde::Serialize)]
struct JobMetricsSummary {
    jobs_submitted: u64,
    jobs_rejected: u64,
    jobs_completed: u64,
    jobs_aborted: u64,
    jobs_blocked: u64,
    fences_raised: u64,
}

impl From<JobMetrics> for JobMetricsSummary {
    fn from(m: JobMetrics) -> Self {
        JobMetricsSummary {
            jobs_submitted: m.jobs_submitted,
            jobs_rejected: m.jobs_rejected,
            jobs_completed: m.jobs_completed,
            jobs_aborted: m.jobs_aborted,
            jobs_blocked: m.jobs_blocked,
            fences_raised: m.fences_raised,
        }
    }
}

const MONITOR_PERIOD: Duration = Duration::from_secs(1);

fn main() {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_env_filter({
            tracing_subscriber::EnvFilter::try_from_default_env()
                .expect("must set RUST_LOG variable")
        })
        .init();

    disk_io_job::env_tunables::assert_no_unknown_env_vars();

    let args: Arc<Args> = Arc::new(Args::parse());
    let block_size = u16::try_from(1u64 << args.block_size_shift.get())
        .expect("block_size_shift must be at most 15");

    let stop_clients = Arc::new(AtomicBool::new(false));
    let (stop_monitor_tx, mut stop_monitor_rx) = oneshot::channel::<RunResult>();

    let num_clients = usize::try_from(args.num_clients.get()).unwrap();
    let stats_state = Arc::new(StatsState {
        jobs_in_last_second: (0..num_clients)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect(),
        latencies_histo: (0..num_clients)
            .map(|_| CachePadded::new(Mutex::new(StatsState::make_latency_histogram())))
            .collect(),
    });

    match args.run_duration {
        RunDuration::UntilCtrlC => {}
        RunDuration::FixedDuration(duration) => {
            let stop_clients = Arc::clone(&stop_clients);
            std::thread::spawn(move || {
                std::thread::sleep(duration);
                info!("configured runtime expired, setting stop flag");
                stop_clients.store(true, Ordering::Relaxed);
            });
        }
        RunDuration::FixedTotalJobCount(_) | RunDuration::FixedPerClientJobCount(_) => {
            // counted down by the clients, see `ops_left_per_client`
        }
    }

    ctrlc::set_handler({
        let stop_clients = Arc::clone(&stop_clients);
        move || {
            info!("ctrl-c, setting stop flag");
            if stop_clients.fetch_or(true, Ordering::Relaxed) {
                error!("stop flag was already set, aborting");
                std::process::abort();
            } else {
                info!("first ctrl-c, stop flag set");
            }
        }
    })
    .unwrap();

    let backend: Arc<dyn DiskBackend> = match &args.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::default()),
        BackendKind::Files { .. } => Arc::new(FileBackend::default()),
    };
    let storages = Arc::new(setup_storages(&args));

    let (system, worker) = System::launch(Config::default());
    let workers = WorkerPool::spawn(worker, backend, args.workers.get()).unwrap();

    let clients_and_monitor_ready = Arc::new(tokio::sync::Barrier::new(num_clients + 1));

    let monitor = std::thread::Builder::new()
        .name("monitor".to_owned())
        .spawn({
            let stats_state = Arc::clone(&stats_state);
            let args = Arc::clone(&args);
            let clients_and_monitor_ready = Arc::clone(&clients_and_monitor_ready);

            struct AggregatedStats {
                start: std::time::Instant,
                op_count: u64,
                op_size: u64,
                latencies_histo: hdrhistogram::Histogram<u64>,
            }
            const LATENCY_PERCENTILES: [f64; 5] = [50.0, 90.0, 99.0, 99.9, 99.99];
            fn latency_percentiles_serialize<S>(
                values: &[f64; LATENCY_PERCENTILES.len()],
                serializer: S,
            ) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serde::Serialize::serialize(
                    &LATENCY_PERCENTILES
                        .iter()
                        .map(|p| format!("p{p}"))
                        .zip(values.iter().cloned())
                        .collect::<HashMap<_, _>>(),
                    serializer,
                )
            }
            #[serde_as]
            #[derive(serde::Serialize)]
            struct AggregatedStatsSummary {
                #[serde_as(as = "serde_with::DurationMicroSeconds")]
                elapsed_us: std::time::Duration,
                throughput_jobs_per_sec: f64,
                throughput_bw_mibps: f64,
                latency_min_us: f64,
                latency_mean_us: f64,
                latency_max_us: f64,
                #[serde(serialize_with = "latency_percentiles_serialize")]
                latency_percentiles: [f64; LATENCY_PERCENTILES.len()],
            }

            impl std::fmt::Display for AggregatedStatsSummary {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(
                        f,
                        "t{:.2} TP: jobs/s={:.0} bw={:.2} LAT(us): min={:.0} mean={:.0} max={:.0} {}",
                        self.elapsed_us.as_secs_f64(),
                        self.throughput_jobs_per_sec,
                        self.throughput_bw_mibps,
                        self.latency_min_us,
                        self.latency_mean_us,
                        self.latency_max_us,
                        self.latency_percentiles
                            .iter()
                            .zip(LATENCY_PERCENTILES.iter())
                            .map(|(v, p)| format!("p{p}={v:.0}"))
                            .join(" "),
                    )
                }
            }
            impl AggregatedStats {
                fn new(op_size: u64) -> Self {
                    Self {
                        start: std::time::Instant::now(),
                        op_count: 0,
                        op_size,
                        latencies_histo: StatsState::make_latency_histogram(),
                    }
                }
                fn reset(&mut self, start: std::time::Instant) {
                    self.start = start;
                    self.op_count = 0;
                    self.latencies_histo.clear();
                }
                fn summary_since_start(&self) -> AggregatedStatsSummary {
                    let elapsed = self.start.elapsed();
                    let elapsed_secs = elapsed.as_secs_f64();
                    let histo = &self.latencies_histo;
                    AggregatedStatsSummary {
                        elapsed_us: elapsed,
                        throughput_jobs_per_sec: (self.op_count as f64) / elapsed_secs,
                        throughput_bw_mibps: (self.op_count as f64) * (self.op_size as f64)
                            / ((1 << 20) as f64)
                            / elapsed_secs,
                        latency_min_us: histo.min().as_f64() / 1000.0,
                        latency_mean_us: histo.mean() / 1000.0,
                        latency_max_us: histo.max().as_f64() / 1000.0,
                        latency_percentiles: {
                            let mut values = [0.0; LATENCY_PERCENTILES.len()];
                            for (value_ref, p) in values.iter_mut().zip(LATENCY_PERCENTILES) {
                                *value_ref = histo.value_at_percentile(p).as_f64() / 1000.0;
                            }
                            values
                        },
                    }
                }
            }

            #[derive(serde::Serialize)]
            struct BenchmarkOutput {
                args: Args,
                sorted_per_client_total_jobs: Vec<u64>,
                sorted_per_client_runtimes_secs: Vec<f64>,
                job_metrics: JobMetricsSummary,
                totals: Vec<AggregatedStatsSummary>,
            }

            move || {
                let mut per_client_total_jobs = HashMap::new();
                let op_size = 1 << args.block_size_shift.get();
                let mut total = AggregatedStats::new(op_size);
                let mut total_summaries = Vec::new();
                let mut this_round = AggregatedStats::new(op_size);

                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap();

                rt.block_on(clients_and_monitor_ready.wait());

                let mut ticker = rt.block_on(async move { tokio::time::interval(MONITOR_PERIOD) });

                let mut exit: Option<RunResult> = None;
                while exit.is_none() {
                    this_round.reset(std::time::Instant::now());
                    rt.block_on(async {
                        let ticker = &mut ticker;
                        tokio::select! {
                            _ = ticker.tick() => {}
                            msg = &mut stop_monitor_rx => {
                                exit = Some(msg.unwrap());
                            }
                        };
                    });

                    for (client, counter) in stats_state.jobs_in_last_second.iter().enumerate() {
                        let client_jobs_in_last_second = counter.swap(0, Ordering::Relaxed);
                        *per_client_total_jobs.entry(client).or_insert(0) +=
                            client_jobs_in_last_second;
                        this_round.op_count += client_jobs_in_last_second;
                        total.op_count += client_jobs_in_last_second;
                    }
                    for h in &stats_state.latencies_histo {
                        let mut h = h.lock().unwrap();
                        total.latencies_histo += &*h;
                        this_round.latencies_histo += &*h;
                        h.clear();
                    }

                    let this_round_summary = this_round.summary_since_start();
                    let total_summary = total.summary_since_start();

                    info!("{this_round_summary}");
                    info!("{total_summary}");

                    total_summaries.push(total_summary);
                }
                let exit = exit.unwrap();

                info!("monitor shutting down");
                info!(metrics = ?exit.metrics, "job system");

                // per-client totals show whether clients got a fair share in time-based runs
                let output = BenchmarkOutput {
                    args: args.as_ref().clone(),
                    sorted_per_client_total_jobs: per_client_total_jobs
                        .values()
                        .cloned()
                        .sorted()
                        .collect(),
                    sorted_per_client_runtimes_secs: exit
                        .client_run_times
                        .into_iter()
                        .sorted()
                        .map(|d| d.as_secs_f64())
                        .collect(),
                    job_metrics: exit.metrics.into(),
                    totals: total_summaries,
                };
                let outpath = PathBuf::from("benchmark.output.json");
                info!("writing results to {:?}", outpath);
                std::fs::write(&outpath, serde_json::to_string(&output).unwrap()).unwrap();

                let total_summary = total.summary_since_start();
                info!("total: {}", total_summary);
            }
        })
        .unwrap();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let res = rt.block_on(run(
        Arc::clone(&args),
        block_size,
        system,
        storages,
        clients_and_monitor_ready,
        stop_clients,
        stats_state,
    ));
    info!("joining workers");
    workers.join().unwrap();
    stop_monitor_tx
        .send(res)
        .ok()
        .expect("monitor must not exit by itself");
    monitor.join().unwrap();
}

fn setup_storages(args: &Args) -> Vec<Arc<Storage>> {
    (0..args.num_storages.get())
        .map(|i| {
            let id = StorageId(u32::try_from(i).unwrap());
            let save_path = match &args.backend {
                BackendKind::Memory => PathBuf::from(format!("storage_{i}")),
                BackendKind::Files { dir } => {
                    let path = dir.join(format!("storage_{i}"));
                    std::fs::create_dir_all(&path).unwrap();
                    path
                }
            };
            Storage::new(id, save_path, 1)
        })
        .collect()
}

#[derive(Clone)]
struct OpsLeft(Option<Arc<AtomicI64>>);

impl OpsLeft {
    fn take_one_op(&self) -> ControlFlow<()> {
        match &self.0 {
            None => (),
            Some(ops_left) => {
                let ops_left = ops_left.fetch_sub(1, Ordering::Relaxed);
                if ops_left <= 0 {
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }
}

fn ops_left_per_client(args: &Args) -> Vec<OpsLeft> {
    let total = match args.run_duration {
        RunDuration::FixedTotalJobCount(n) => {
            Some(Arc::new(AtomicI64::new(i64::try_from(n).unwrap())))
        }
        _ => None,
    };
    (0..args.num_clients.get())
        .map(|_| match args.run_duration {
            RunDuration::UntilCtrlC | RunDuration::FixedDuration(_) => OpsLeft(None),
            RunDuration::FixedTotalJobCount(_) => OpsLeft(total.clone()),
            // a separate budget per client
            RunDuration::FixedPerClientJobCount(n) => {
                OpsLeft(Some(Arc::new(AtomicI64::new(i64::try_from(n).unwrap()))))
            }
        })
        .collect()
}

async fn run(
    args: Arc<Args>,
    block_size: u16,
    mut system: SystemHandle,
    storages: Arc<Vec<Arc<Storage>>>,
    clients_ready: Arc<tokio::sync::Barrier>,
    stop: Arc<AtomicBool>,
    stats_state: Arc<StatsState>,
) -> RunResult {
    let submitter = system.submitter();

    // all handlers run on this task
    let (stop_dispatcher_tx, mut stop_dispatcher_rx) = oneshot::channel::<()>();
    let dispatcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = system.completed() => {}
                _ = &mut stop_dispatcher_rx => break,
            }
        }
        let metrics = system.metrics();
        system.shutdown().await;
        metrics
    });

    info!("populating {} storages", storages.len());
    populate(&submitter, &storages, block_size).await;

    let mut handles = Vec::new();
    for (i, ops_left) in ops_left_per_client(&args).into_iter().enumerate() {
        let args = Arc::clone(&args);
        let submitter = submitter.clone();
        let storages = Arc::clone(&storages);
        let clients_ready = Arc::clone(&clients_ready);
        let stop = Arc::clone(&stop);
        let stats_state = Arc::clone(&stats_state);
        handles.push(tokio::spawn(async move {
            clients_ready.wait().await;
            let start = std::time::Instant::now();
            client(i, &args, block_size, &submitter, &storages, ops_left, &stop, &stats_state)
                .await;
            start.elapsed()
        }));
    }
    let mut client_run_times = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        info!("awaiting client {i}");
        client_run_times.push(handle.await.unwrap());
    }

    drop(submitter);
    stop_dispatcher_tx.send(()).unwrap();
    let metrics = dispatcher.await.unwrap();
    RunResult {
        client_run_times,
        metrics,
    }
}

/// Writes every piece once so reads find data.
async fn populate(submitter: &Submitter, storages: &[Arc<Storage>], block_size: u16) {
    let mut pending = Vec::new();
    for storage in storages {
        for piece in 0..PIECES_PER_STORAGE {
            let mut buffer = DiskBuffer::new(usize::from(block_size));
            rand::thread_rng().fill_bytes(&mut buffer);
            let (tx, rx) = oneshot::channel();
            let job = Job::write(
                Arc::clone(storage),
                PieceIndex(piece),
                IoArgs::new(0, block_size),
                buffer,
                move |res| {
                    let _ = tx.send(res);
                },
            );
            submitter.submit(job).unwrap();
            pending.push(rx);
        }
    }
    for rx in pending {
        rx.await.unwrap().unwrap();
    }
}

#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all, level = "trace", fields(client = %i))]
async fn client(
    i: usize,
    args: &Args,
    block_size: u16,
    submitter: &Submitter,
    storages: &[Arc<Storage>],
    ops_left: OpsLeft,
    stop: &AtomicBool,
    stats_state: &StatsState,
) {
    let mut rng = StdRng::from_entropy();
    let mut job_num: u64 = 0;
    while !stop.load(Ordering::Relaxed) {
        let ControlFlow::Continue(()) = ops_left.take_one_op() else {
            break;
        };
        job_num += 1;

        let storage = Arc::clone(&storages[rng.gen_range(0..storages.len())]);
        let piece = PieceIndex(rng.gen_range(0..PIECES_PER_STORAGE));
        let io = IoArgs::new(0, block_size);
        let (tx, rx) = oneshot::channel::<Result<(), StorageError>>();
        let job = match args.fence_every {
            Some(n) if job_num % n.get() == 0 => Job::release_files(storage, move || {
                let _ = tx.send(Ok(()));
            }),
            _ => {
                let roll: u16 = rng.gen_range(0..100);
                let writes = u16::from(args.write_percent);
                if roll < writes {
                    let mut buffer = DiskBuffer::new(usize::from(block_size));
                    rng.fill_bytes(&mut buffer);
                    Job::write(storage, piece, io, buffer, move |res| {
                        let _ = tx.send(res);
                    })
                } else if roll < writes + u16::from(args.hash_percent) {
                    Job::hash(storage, piece, move |_piece, res| {
                        let _ = tx.send(res.map(|_digest| ()));
                    })
                } else {
                    Job::read(storage, piece, io, move |res| {
                        let _ = tx.send(
                            res.map(|buf| assert_eq!(buf.len(), usize::from(block_size))),
                        );
                    })
                }
            }
        };

        let start = std::time::Instant::now();
        if let Err(rejected) = submitter.submit(job) {
            warn!("client {i} stopping early: {rejected}");
            break;
        }
        match rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("client {i}: job failed: {e}");
                continue;
            }
            Err(_) => panic!("handler dropped without being called"),
        }

        stats_state.jobs_in_last_second[i].fetch_add(1, Ordering::Relaxed);
        stats_state.record_job_latency(i, start.elapsed());
    }
    info!("Client {i} stopping");
}
