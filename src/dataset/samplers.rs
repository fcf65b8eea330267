//! Conversation sampling strategies
//!
//! The timing manager asks a sampler which conversation each credit
//! targets. All randomness flows from the root generator, so a seeded
//! run replays the same selection sequence.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::SamplerKind;
use crate::domain_types::ConversationId;

/// Selects the conversation for the next credit.
pub trait ConversationSampler: Send + Sync {
    fn next_id(&mut self) -> ConversationId;
}

/// Round-robin over the conversation ids in load order.
pub struct SequentialSampler {
    ids: Vec<ConversationId>,
    cursor: usize,
}

impl SequentialSampler {
    pub fn new(ids: Vec<ConversationId>) -> Self {
        Self { ids, cursor: 0 }
    }
}

impl ConversationSampler for SequentialSampler {
    fn next_id(&mut self) -> ConversationId {
        let id = self.ids[self.cursor % self.ids.len()].clone();
        self.cursor = (self.cursor + 1) % self.ids.len();
        id
    }
}

/// Uniform sampling with replacement.
pub struct RandomSampler {
    ids: Vec<ConversationId>,
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(ids: Vec<ConversationId>, rng: StdRng) -> Self {
        Self { ids, rng }
    }
}

impl ConversationSampler for RandomSampler {
    fn next_id(&mut self) -> ConversationId {
        let index = self.rng.gen_range(0..self.ids.len());
        self.ids[index].clone()
    }
}

/// Random without replacement; reshuffles after each full pass.
pub struct ShuffleSampler {
    ids: Vec<ConversationId>,
    deck: Vec<usize>,
    rng: StdRng,
}

impl ShuffleSampler {
    pub fn new(ids: Vec<ConversationId>, rng: StdRng) -> Self {
        Self {
            deck: Vec::with_capacity(ids.len()),
            ids,
            rng,
        }
    }
}

impl ConversationSampler for ShuffleSampler {
    fn next_id(&mut self) -> ConversationId {
        if self.deck.is_empty() {
            self.deck = (0..self.ids.len()).collect();
            self.deck.shuffle(&mut self.rng);
        }
        let index = self.deck.pop().expect("deck refilled above");
        self.ids[index].clone()
    }
}

/// Builds the configured sampler. The id list must be non-empty.
pub fn build_sampler(
    kind: SamplerKind,
    ids: Vec<ConversationId>,
    rng: StdRng,
) -> Box<dyn ConversationSampler> {
    debug_assert!(!ids.is_empty(), "sampler requires at least one conversation");
    match kind {
        SamplerKind::Sequential => Box::new(SequentialSampler::new(ids)),
        SamplerKind::Random => Box::new(RandomSampler::new(ids, rng)),
        SamplerKind::Shuffle => Box::new(ShuffleSampler::new(ids, rng)),
    }
}
