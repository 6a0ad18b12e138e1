//! Sequence-mode discovery: every id in an inclusive range, no network.

use tracing::info;

use super::{Candidate, DiscoveryEnd, Emitter};
use crate::models::CandidateId;

pub struct SequenceDiscovery {
    start: CandidateId,
    end: CandidateId,
}

impl SequenceDiscovery {
    pub fn new(start: CandidateId, end: CandidateId) -> Self {
        Self { start, end }
    }

    pub(crate) async fn run(self, emitter: Emitter) -> DiscoveryEnd {
        if self.start > self.end {
            info!(
                "Sequence discovery: start {} is past end {}, nothing to do",
                self.start, self.end
            );
            return DiscoveryEnd::RangeExhausted { last: self.end };
        }

        for id in self.start..=self.end {
            if let Err(end) = emitter.emit(Candidate { id, cursor: id }).await {
                return end;
            }
        }

        info!("Sequence discovery: reached end of range at {}", self.end);
        DiscoveryEnd::RangeExhausted { last: self.end }
    }
}
