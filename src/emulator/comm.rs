//! Collective communication between emulator ranks.
//!
//! The [`Communicator`] trait is byte-level so it stays object-safe; typed
//! collectives go through [`broadcast`] and [`gather`], which serialise with
//! `serde_json`.
//!
//! # Invariants
//!
//! - **Collective**: every rank of a group calls the same collectives in the
//!   same order with the same `root`.
//! - **No silent root**: a broadcast whose root supplies nothing fails on every
//!   rank instead of leaving the others waiting.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Barrier, Mutex};

use ndarray::{ArrayD, IxDyn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::emulator::Outputs;
use crate::error::{CosmologyError, CosmologyResult};

/// Byte-level collectives.
pub trait Communicator: Send + Sync {
    /// Rank of this process in the group.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Send `data` from `root` to every rank; non-root ranks pass `None`.
    fn broadcast_bytes(&self, data: Option<Vec<u8>>, root: usize) -> CosmologyResult<Vec<u8>>;

    /// Collect one payload per rank on `root`, ordered by rank.
    fn gather_bytes(&self, data: Vec<u8>, root: usize) -> CosmologyResult<Option<Vec<Vec<u8>>>>;
}

impl fmt::Debug for dyn Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

fn check_root(comm: &dyn Communicator, root: usize) -> CosmologyResult<()> {
    if root >= comm.size() {
        return Err(CosmologyError::input(format!(
            "root rank {root} outside a group of size {}",
            comm.size()
        )));
    }
    Ok(())
}

/// Typed broadcast; the root passes `Some(value)`, the others `None`.
pub fn broadcast<T>(comm: &dyn Communicator, value: Option<T>, root: usize) -> CosmologyResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let payload = if comm.rank() == root {
        Some(serde_json::to_vec(&value)?)
    } else {
        None
    };
    let bytes = comm.broadcast_bytes(payload, root)?;
    let received: Option<T> = serde_json::from_slice(&bytes)?;
    received.ok_or_else(|| CosmologyError::computation(format!("rank {root} broadcast nothing")))
}

/// Typed gather; `Some(values)` on the root, `None` elsewhere.
pub fn gather<T>(comm: &dyn Communicator, value: &T, root: usize) -> CosmologyResult<Option<Vec<T>>>
where
    T: Serialize + DeserializeOwned,
{
    let bytes = serde_json::to_vec(value)?;
    match comm.gather_bytes(bytes, root)? {
        Some(all) => all
            .iter()
            .map(|b| serde_json::from_slice(b).map_err(CosmologyError::from))
            .collect::<CosmologyResult<Vec<T>>>()
            .map(Some),
        None => Ok(None),
    }
}

/// Error crossing ranks with its kind intact.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Failure {
    input: bool,
    message: String,
}

impl From<&CosmologyError> for Failure {
    fn from(err: &CosmologyError) -> Self {
        match err {
            CosmologyError::Input { message, .. } => Self {
                input: true,
                message: message.clone(),
            },
            CosmologyError::Computation { message, .. } => Self {
                input: false,
                message: message.clone(),
            },
        }
    }
}

impl From<Failure> for CosmologyError {
    fn from(failure: Failure) -> Self {
        if failure.input {
            CosmologyError::input(failure.message)
        } else {
            CosmologyError::computation(failure.message)
        }
    }
}

/// Broadcast the outcome of work done on `root` only. The root passes
/// `Some(result)` and gets its own result back; the other ranks get a copy,
/// so success or failure is the same on every rank.
pub(crate) fn share<T>(comm: &dyn Communicator, local: Option<CosmologyResult<T>>, root: usize) -> CosmologyResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let payload = local.as_ref().map(|result| match result {
        Ok(value) => serde_json::to_value(value).map_err(|err| Failure::from(&CosmologyError::from(err))),
        Err(err) => Err(Failure::from(err)),
    });
    let shared: Result<serde_json::Value, Failure> = broadcast(comm, payload, root)?;
    match local {
        Some(result) => result,
        None => Ok(serde_json::from_value(shared?)?),
    }
}

// ── Wire form ──

/// Bit-exact transport form of an array; JSON has no NaN or infinity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct WireArray {
    shape: Vec<usize>,
    bits: Vec<u64>,
}

impl WireArray {
    pub(crate) fn from_array(array: &ArrayD<f64>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            bits: array.iter().map(|x| x.to_bits()).collect(),
        }
    }

    pub(crate) fn into_array(self) -> CosmologyResult<ArrayD<f64>> {
        let values = self.bits.into_iter().map(f64::from_bits).collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&self.shape), values)?)
    }
}

pub(crate) fn to_wire(outputs: &Outputs) -> BTreeMap<String, WireArray> {
    outputs
        .iter()
        .map(|(name, array)| (name.clone(), WireArray::from_array(array)))
        .collect()
}

pub(crate) fn from_wire(wire: BTreeMap<String, WireArray>) -> CosmologyResult<Outputs> {
    wire.into_iter()
        .map(|(name, array)| Ok((name, array.into_array()?)))
        .collect()
}

// ─── SingleProcess ─────────────────────────────────────────────────────────

/// Group of one.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast_bytes(&self, data: Option<Vec<u8>>, root: usize) -> CosmologyResult<Vec<u8>> {
        check_root(self, root)?;
        data.ok_or_else(|| CosmologyError::computation("rank 0 broadcast nothing"))
    }

    fn gather_bytes(&self, data: Vec<u8>, root: usize) -> CosmologyResult<Option<Vec<Vec<u8>>>> {
        check_root(self, root)?;
        Ok(Some(vec![data]))
    }
}

// ─── LocalGroup ────────────────────────────────────────────────────────────

struct Shared {
    barrier: Barrier,
    slot: Mutex<Option<Vec<u8>>>,
    gathered: Mutex<Vec<Option<Vec<u8>>>>,
}

/// Ranks living on threads of one process, synchronised with a barrier.
#[derive(Clone)]
pub struct LocalGroup {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl fmt::Debug for LocalGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalGroup")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

fn poisoned<T>(_: T) -> CosmologyError {
    CosmologyError::computation("communicator lock poisoned by a panicking rank")
}

impl LocalGroup {
    /// One handle per rank; each must be driven by its own thread.
    pub fn new(size: usize) -> Vec<LocalGroup> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slot: Mutex::new(None),
            gathered: Mutex::new(vec![None; size]),
        });
        (0..size)
            .map(|rank| LocalGroup {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Run `f` on `size` scoped threads, one per rank, and return the
    /// results ordered by rank.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(LocalGroup) -> R + Sync,
        R: Send,
    {
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = LocalGroup::new(size)
                .into_iter()
                .map(|group| scope.spawn(move || f(group)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

impl Communicator for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast_bytes(&self, data: Option<Vec<u8>>, root: usize) -> CosmologyResult<Vec<u8>> {
        check_root(self, root)?;
        if self.rank == root {
            *self.shared.slot.lock().map_err(poisoned)? = data;
        }
        self.shared.barrier.wait();
        let received = self.shared.slot.lock().map_err(poisoned)?.clone();
        // Nobody may overwrite the slot before every rank has read it.
        self.shared.barrier.wait();
        received.ok_or_else(|| CosmologyError::computation(format!("rank {root} broadcast nothing")))
    }

    fn gather_bytes(&self, data: Vec<u8>, root: usize) -> CosmologyResult<Option<Vec<Vec<u8>>>> {
        check_root(self, root)?;
        self.shared.gathered.lock().map_err(poisoned)?[self.rank] = Some(data);
        self.shared.barrier.wait();
        let result = if self.rank == root {
            let mut gathered = self.shared.gathered.lock().map_err(poisoned)?;
            let all: Option<Vec<Vec<u8>>> = gathered.iter_mut().map(Option::take).collect();
            Some(all.ok_or_else(|| CosmologyError::computation("a rank contributed nothing to gather"))?)
        } else {
            None
        };
        self.shared.barrier.wait();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_process_collectives() {
        let comm = SingleProcess;
        let v: Vec<f64> = broadcast(&comm, Some(vec![1.0, 2.0]), 0).unwrap();
        assert_eq!(v, vec![1.0, 2.0]);
        let all = gather(&comm, &3usize, 0).unwrap().unwrap();
        assert_eq!(all, vec![3]);
        assert!(broadcast::<f64>(&comm, None, 0).unwrap_err().is_computation());
        assert!(comm.gather_bytes(vec![], 1).unwrap_err().is_input());
    }

    #[test]
    fn test_local_group_broadcast_reaches_every_rank() {
        let results = LocalGroup::run(4, |comm| {
            let value = (comm.rank() == 2).then(|| "hello".to_string());
            let first: String = broadcast(&comm, value, 2).unwrap();
            let second: usize = broadcast(&comm, (comm.rank() == 0).then_some(7), 0).unwrap();
            (first, second)
        });
        assert_eq!(results.len(), 4);
        for (first, second) in results {
            assert_eq!(first, "hello");
            assert_eq!(second, 7);
        }
    }

    #[test]
    fn test_local_group_gather_orders_by_rank() {
        let results = LocalGroup::run(3, |comm| gather(&comm, &(comm.rank() * 10), 1).unwrap());
        assert!(results[0].is_none());
        assert_eq!(results[1].as_deref(), Some(&[0, 10, 20][..]));
        assert!(results[2].is_none());
    }

    #[test]
    fn test_wire_form_keeps_non_finite_values() {
        let mut outputs = Outputs::new();
        outputs.insert(
            "y".into(),
            ndarray::arr1(&[f64::NAN, f64::INFINITY, -0.0]).into_dyn(),
        );
        let sent: BTreeMap<String, WireArray> = broadcast(&SingleProcess, Some(to_wire(&outputs)), 0).unwrap();
        let back = from_wire(sent).unwrap();
        let y = &back["y"];
        assert!(y[[0]].is_nan());
        assert_eq!(y[[1]], f64::INFINITY);
        assert!(y[[2]].is_sign_negative());
    }

    #[test]
    fn test_empty_root_fails_on_all_ranks() {
        let results = LocalGroup::run(3, |comm| broadcast::<f64>(&comm, None, 0).is_err());
        assert!(results.iter().all(|failed| *failed), "results={:?}", results);
    }
}
