//! Parallel export scheduler.
//!
//! A single sequential pre-pass streams the (possibly resampled) messages,
//! resolves names and indices, and turns them into tasks. Tasks that resolve
//! to the same output path form one group and are pinned to one worker in
//! timestamp order; everything else runs concurrently on a bounded pool fed
//! through bounded channels, so in-flight work stays proportional to the
//! worker count rather than the log size.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use flume::{Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use ordered_float::OrderedFloat;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::{ConfigError, RoutineError, TaskFailure};
use crate::message::Message;
use crate::naming::{self, IndexAllocator, NamingPattern};
use crate::registry::{ExportMode, ProcessorFn, Registry, RoutineFn};
use crate::resample::{Association, MessageIter, Resampler};
use crate::source::ChannelSource;

/// Bounded depth of each worker's task queue; total in-flight work is a
/// small multiple of the worker count.
const QUEUE_DEPTH: usize = 2;

/// Aggregate result of a run. `success` is false iff a single-file group
/// failed on its initializing write; recoverable task errors are listed but
/// do not fail the run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Messages successfully written, per channel.
    pub exported: BTreeMap<String, u64>,
    /// Frames dropped by the resampler, per companion channel.
    pub discarded: BTreeMap<String, u64>,
    pub errors: Vec<TaskFailure>,
    pub success: bool,
}

type ProcessorChain = Arc<Vec<(ProcessorFn, Arc<BTreeMap<String, String>>)>>;

/// One unit of work: write one message in one format to one path.
struct Task {
    channel: String,
    format: String,
    message: Message,
    /// Extension-less output path; the routine appends the extension.
    path: PathBuf,
    /// First task that resolves to this path.
    is_first: bool,
    group: usize,
    single_file: bool,
    routine: RoutineFn,
    processors: ProcessorChain,
}

enum Event {
    Done { channel: String },
    Failed(TaskFailure),
}

/// Per-export-spec plan resolved during pre-flight.
struct ExportPlan {
    format: String,
    subdir: Option<String>,
    single_file: bool,
    routine: RoutineFn,
    processors: ProcessorChain,
}

/// Sequential pre-pass state: index allocation and path → group assignment.
/// Runs ahead of the pool so names and group membership never depend on
/// worker count or completion order.
struct Planner {
    pattern: NamingPattern,
    output_dir: PathBuf,
    alloc: IndexAllocator,
    groups: HashMap<PathBuf, usize>,
    plans: HashMap<String, Vec<ExportPlan>>,
}

impl Planner {
    fn tasks_for(&mut self, msg: &Message) -> Vec<Task> {
        let Some(plans) = self.plans.get(&msg.channel) else {
            return Vec::new();
        };
        let mut tasks = Vec::with_capacity(plans.len());
        for plan in plans {
            let index = self.alloc.next(&msg.channel, &plan.format, plan.subdir.as_deref());
            let name = self.pattern.resolve(msg, index);
            let path = naming::output_path(&self.output_dir, plan.subdir.as_deref(), &name);
            let next_group = self.groups.len();
            let mut is_first = false;
            let group = *self.groups.entry(path.clone()).or_insert_with(|| {
                is_first = true;
                next_group
            });
            tasks.push(Task {
                channel: msg.channel.clone(),
                format: plan.format.clone(),
                message: msg.clone(),
                path,
                is_first,
                group,
                single_file: plan.single_file,
                routine: Arc::clone(&plan.routine),
                processors: Arc::clone(&plan.processors),
            });
        }
        tasks
    }
}

/// The pre-pass input stream: either all selected channels merged by
/// timestamp, or frames from the resampler flattened master-first.
enum Stream<'a> {
    Merged(KWayMerge<'a>),
    Resampled(FrameFlattener<'a>),
}

impl Iterator for Stream<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        match self {
            Stream::Merged(m) => m.next(),
            Stream::Resampled(f) => f.next(),
        }
    }
}

impl Stream<'_> {
    /// Per-channel resample discard counts; valid after the stream is
    /// drained.
    fn into_discards(self) -> BTreeMap<String, u64> {
        match self {
            Stream::Merged(_) => BTreeMap::new(),
            Stream::Resampled(f) => f.into_discards(),
        }
    }
}

/// Runs export jobs against a registry. The registry is populated before the
/// run and read-only for its duration.
pub struct Exporter<'r> {
    registry: &'r Registry,
    show_progress: bool,
}

impl<'r> Exporter<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry, show_progress: false }
    }

    pub fn show_progress(mut self, on: bool) -> Self {
        self.show_progress = on;
        self
    }

    /// Execute one run. Configuration problems abort before any task is
    /// scheduled and before anything is written.
    pub fn run(&self, source: &dyn ChannelSource, config: &RunConfig) -> Result<RunSummary, ConfigError> {
        let mut planner = self.preflight(source, config)?;

        let workers = worker_count(config.cpu_percentage)?;
        info!(workers, exports = config.exports.len(), "starting export run");

        let selected: Vec<String> =
            config.selected_channels().into_iter().map(str::to_string).collect();
        let mut stream = match &config.resample {
            Some(rs) => {
                let companions: Vec<(String, MessageIter<'_>)> = selected
                    .iter()
                    .filter(|c| **c != rs.master)
                    .map(|c| (c.clone(), source.iter_channel(c)))
                    .collect();
                let resampler = Resampler::new(
                    source.iter_channel(&rs.master),
                    companions,
                    rs.association,
                    rs.discard_eps,
                )?;
                Stream::Resampled(FrameFlattener::new(resampler))
            }
            None => {
                Stream::Merged(KWayMerge::new(selected.iter().map(|c| source.iter_channel(c))))
            }
        };

        let pb = if self.show_progress {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner} {pos} tasks").expect("progress template"),
            );
            Some(pb)
        } else {
            None
        };

        let mut summary = if workers == 0 {
            run_sequential(&mut stream, &mut planner, pb.as_ref())
        } else {
            run_parallel(&mut stream, &mut planner, workers, pb.as_ref())
        };
        summary.discarded = stream.into_discards();

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        summary.success = !summary.errors.iter().any(|e| e.group_init);
        for (channel, count) in &summary.discarded {
            info!(channel, count, "frames discarded during resampling");
        }
        info!(
            exported = summary.exported.values().sum::<u64>(),
            errors = summary.errors.len(),
            success = summary.success,
            "export run finished"
        );
        Ok(summary)
    }

    /// Resolve every routine and processor a run needs and validate the
    /// configuration. Fails before any task executes.
    fn preflight(&self, source: &dyn ChannelSource, config: &RunConfig) -> Result<Planner, ConfigError> {
        if config.cpu_percentage > 100 {
            return Err(ConfigError::InvalidCpuPercentage(config.cpu_percentage));
        }
        let pattern = NamingPattern::parse(&config.naming)?;

        // Processor chains per channel, applied in spec order.
        let mut chains: HashMap<String, Vec<(ProcessorFn, Arc<BTreeMap<String, String>>)>> =
            HashMap::new();
        for spec in &config.processing {
            let channel = source
                .channel(&spec.channel)
                .ok_or_else(|| ConfigError::UnknownChannel(spec.channel.clone()))?;
            let desc = self.registry.processor(channel.kind, &spec.processor)?;
            for arg in &desc.required_args {
                if !spec.args.contains_key(*arg) {
                    return Err(ConfigError::MissingProcessorArg {
                        processor: spec.processor.clone(),
                        arg: (*arg).to_string(),
                    });
                }
            }
            chains
                .entry(spec.channel.clone())
                .or_default()
                .push((Arc::clone(&desc.func), Arc::new(spec.args.clone())));
        }
        let chains: HashMap<String, ProcessorChain> =
            chains.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();
        let empty_chain: ProcessorChain = Arc::new(Vec::new());

        let mut plans: HashMap<String, Vec<ExportPlan>> = HashMap::new();
        for spec in &config.exports {
            let channel = source
                .channel(&spec.channel)
                .ok_or_else(|| ConfigError::UnknownChannel(spec.channel.clone()))?;
            let routine = self.registry.routine(channel.kind, &spec.format)?;
            debug!(channel = %spec.channel, format = %spec.format, mode = %routine.mode, "resolved routine");
            plans.entry(spec.channel.clone()).or_default().push(ExportPlan {
                format: spec.format.clone(),
                subdir: spec.subdir.clone(),
                single_file: routine.mode == ExportMode::SingleFile,
                routine: Arc::clone(&routine.func),
                processors: chains
                    .get(&spec.channel)
                    .cloned()
                    .unwrap_or_else(|| Arc::clone(&empty_chain)),
            });
        }

        if let Some(rs) = &config.resample {
            if !plans.contains_key(&rs.master) {
                return Err(ConfigError::UnknownMasterChannel(rs.master.clone()));
            }
            if rs.association == Association::Nearest && rs.discard_eps.is_none() {
                return Err(ConfigError::NearestWithoutEpsilon);
            }
        }

        Ok(Planner {
            pattern,
            output_dir: config.output_dir.clone(),
            alloc: IndexAllocator::new(),
            groups: HashMap::new(),
            plans,
        })
    }
}

/// cpu_percentage = 0: execute every task inline on the producer thread, in
/// pre-pass order. Gives a strict global order across all outputs.
fn run_sequential(
    stream: &mut Stream<'_>,
    planner: &mut Planner,
    pb: Option<&ProgressBar>,
) -> RunSummary {
    let mut summary = RunSummary::default();
    let mut poisoned = HashSet::new();
    for msg in stream {
        for task in planner.tasks_for(&msg) {
            if let Some(event) = execute_task(task, &mut poisoned) {
                apply_event(&mut summary, event);
            }
            if let Some(pb) = pb {
                pb.inc(1);
            }
        }
    }
    summary
}

fn run_parallel(
    stream: &mut Stream<'_>,
    planner: &mut Planner,
    workers: usize,
    pb: Option<&ProgressBar>,
) -> RunSummary {
    let (event_tx, event_rx): (Sender<Event>, Receiver<Event>) = flume::unbounded();
    let mut queues: Vec<Sender<Task>> = Vec::with_capacity(workers);
    let handles: Vec<_> = (0..workers)
        .map(|id| {
            let (tx, rx) = flume::bounded::<Task>(QUEUE_DEPTH);
            queues.push(tx);
            let events = event_tx.clone();
            std::thread::spawn(move || worker_loop(id, rx, events))
        })
        .collect();
    drop(event_tx);

    for msg in stream {
        for task in planner.tasks_for(&msg) {
            // Same-path tasks go to the same worker in pre-pass order; the
            // bounded send blocks when workers fall behind, which is the
            // backpressure.
            let target = task.group % workers;
            if queues[target].send(task).is_err() {
                warn!(worker = target, "worker exited early; task dropped");
            }
            if let Some(pb) = pb {
                pb.inc(1);
            }
        }
    }
    drop(queues);

    let mut summary = RunSummary::default();
    while let Ok(event) = event_rx.recv() {
        apply_event(&mut summary, event);
    }
    for handle in handles {
        let _ = handle.join();
    }
    summary
}

fn apply_event(summary: &mut RunSummary, event: Event) {
    match event {
        Event::Done { channel } => *summary.exported.entry(channel).or_insert(0) += 1,
        Event::Failed(failure) => summary.errors.push(failure),
    }
}

fn worker_loop(id: usize, rx: Receiver<Task>, events: Sender<Event>) {
    // Groups are pinned to this worker, so group poisoning is worker-local.
    let mut poisoned = HashSet::new();
    while let Ok(task) = rx.recv() {
        if let Some(event) = execute_task(task, &mut poisoned) {
            if events.send(event).is_err() {
                break;
            }
        }
    }
    debug!(worker = id, "worker drained");
}

/// Run one task: processor chain, then routine. Failures are recorded, never
/// propagated. Returns None for a task skipped because its group is
/// poisoned.
fn execute_task(task: Task, poisoned: &mut HashSet<usize>) -> Option<Event> {
    if poisoned.contains(&task.group) {
        return None;
    }
    let Task { channel, format, mut message, path, is_first, group, single_file, routine, processors } =
        task;
    let result = (|| -> Result<(), RoutineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for (func, args) in processors.iter() {
            message.payload = func(&message, args)?;
        }
        routine(&message, &path, &format, is_first)
    })();
    match result {
        Ok(()) => Some(Event::Done { channel }),
        Err(error) => {
            // Losing the initializing write makes the rest of a shared file
            // unusable; skip the group. Later failures continue best-effort.
            let group_init = is_first && single_file;
            if group_init {
                poisoned.insert(group);
                warn!(%channel, path = %path.display(), "group init failed; aborting group");
            }
            Some(Event::Failed(TaskFailure { channel, timestamp: message.timestamp, error, group_init }))
        }
    }
}

fn worker_count(cpu_percentage: u32) -> Result<usize, ConfigError> {
    if cpu_percentage > 100 {
        return Err(ConfigError::InvalidCpuPercentage(cpu_percentage));
    }
    if cpu_percentage == 0 {
        return Ok(0);
    }
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    Ok(((cores * cpu_percentage as usize) / 100).max(1))
}

/// Flattens resampled frames back into a single message stream, master
/// first, keeping the resampler's discard counts for after the drain.
struct FrameFlattener<'a> {
    resampler: Resampler<'a>,
    pending: std::vec::IntoIter<Message>,
}

impl<'a> FrameFlattener<'a> {
    fn new(resampler: Resampler<'a>) -> Self {
        Self { resampler, pending: Vec::new().into_iter() }
    }

    fn into_discards(self) -> BTreeMap<String, u64> {
        self.resampler.into_discarded()
    }
}

impl Iterator for FrameFlattener<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        loop {
            if let Some(msg) = self.pending.next() {
                return Some(msg);
            }
            let frame = self.resampler.next()?;
            self.pending = frame.messages().cloned().collect::<Vec<_>>().into_iter();
        }
    }
}

struct MergeEntry {
    ts: OrderedFloat<f64>,
    src: usize,
    msg: Message,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ts == other.ts && self.src == other.src
    }
}
impl Eq for MergeEntry {}
impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.ts, self.src).cmp(&(other.ts, other.src))
    }
}

/// K-way merge of per-channel streams into one global-time-ordered stream.
/// Ties resolve by channel selection order, which keeps runs reproducible.
struct KWayMerge<'a> {
    iters: Vec<MessageIter<'a>>,
    heap: BinaryHeap<Reverse<MergeEntry>>,
}

impl<'a> KWayMerge<'a> {
    fn new(iters: impl IntoIterator<Item = MessageIter<'a>>) -> Self {
        let mut iters: Vec<MessageIter<'a>> = iters.into_iter().collect();
        let mut heap = BinaryHeap::new();
        for (src, iter) in iters.iter_mut().enumerate() {
            if let Some(msg) = iter.next() {
                heap.push(Reverse(MergeEntry { ts: OrderedFloat(msg.timestamp), src, msg }));
            }
        }
        Self { iters, heap }
    }
}

impl Iterator for KWayMerge<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        let Reverse(entry) = self.heap.pop()?;
        if let Some(next) = self.iters[entry.src].next() {
            self.heap.push(Reverse(MergeEntry {
                ts: OrderedFloat(next.timestamp),
                src: entry.src,
                msg: next,
            }));
        }
        Some(entry.msg)
    }
}
