//! Hard majority-vote ensemble
//!
//! Combines the class predictions of already fitted members. A row is
//! positive when at least half of the members vote positive (ties go to the
//! positive class). The ensemble exposes no probabilities.

use super::{Classifier, ModelError, Result, TrainedModel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MajorityVote {
    members: Vec<(String, TrainedModel)>,
}

impl MajorityVote {
    pub fn new(members: Vec<(String, TrainedModel)>) -> Result<Self> {
        if members.is_empty() {
            return Err(ModelError::EmptyEnsemble);
        }
        Ok(Self { members })
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl Classifier for MajorityVote {
    fn predict_proba(&self, _x: &[Vec<f64>]) -> Option<Vec<f64>> {
        None
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<u8> {
        let mut votes = vec![0usize; x.len()];
        for (_, member) in &self.members {
            for (count, label) in votes.iter_mut().zip(member.predict(x)) {
                *count += usize::from(label);
            }
        }
        let n_members = self.members.len();
        votes
            .into_iter()
            .map(|v| u8::from(2 * v >= n_members))
            .collect()
    }
}
