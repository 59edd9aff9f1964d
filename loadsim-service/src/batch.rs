//! Splits a plan into queue-sized batches.

use loadsim_types::SimulatedRequest;

/// Maximum number of messages the queue accepts in a single batch call.
pub const MAX_BATCH_SIZE: usize = 10;

/// An ordered group of at most [`MAX_BATCH_SIZE`] requests.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    requests: Vec<SimulatedRequest>,
}

impl Batch {
    /// Returns the requests of this batch in plan order.
    pub fn requests(&self) -> &[SimulatedRequest] {
        &self.requests
    }

    /// Returns the number of requests in this batch.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns `true` if the batch has no requests.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Consumes the batch and returns its requests.
    pub fn into_requests(self) -> Vec<SimulatedRequest> {
        self.requests
    }
}

/// Splits `requests` into consecutive batches of at most [`MAX_BATCH_SIZE`].
///
/// Order is preserved and no request is dropped or duplicated. An empty input yields no batches.
pub fn into_batches(requests: Vec<SimulatedRequest>) -> Vec<Batch> {
    let mut batches = Vec::with_capacity(requests.len().div_ceil(MAX_BATCH_SIZE));
    let mut requests = requests.into_iter().peekable();

    while requests.peek().is_some() {
        let requests = requests.by_ref().take(MAX_BATCH_SIZE).collect();
        batches.push(Batch { requests });
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requests(len: usize) -> Vec<SimulatedRequest> {
        (0..len)
            .map(|i| SimulatedRequest::get(format!("http://localhost/users/{i}"), "user"))
            .collect()
    }

    fn sizes(batches: &[Batch]) -> Vec<usize> {
        batches.iter().map(Batch::len).collect()
    }

    #[test]
    fn batch_counts() {
        for len in 0..=35 {
            let batches = into_batches(requests(len));
            assert_eq!(batches.len(), len.div_ceil(MAX_BATCH_SIZE), "len {len}");
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= MAX_BATCH_SIZE));
        }
    }

    #[test]
    fn concatenation_preserves_input() {
        let input = requests(23);
        let batches = into_batches(input.clone());
        assert_eq!(sizes(&batches), [10, 10, 3]);

        let reassembled: Vec<_> = batches.into_iter().flat_map(Batch::into_requests).collect();
        assert_eq!(reassembled, input);
    }

    #[test]
    fn rebatching_is_stable() {
        let first = into_batches(requests(47));
        let reassembled = first.iter().flat_map(|b| b.requests().to_vec()).collect();
        let second = into_batches(reassembled);
        assert_eq!(first, second);
    }

    #[test]
    fn small_plan_is_single_batch() {
        let batches = into_batches(requests(8));
        assert_eq!(sizes(&batches), [8]);
    }
}
