//! Iterative parallel lookup.
//!
//! Both FIND_NODE and FIND_VALUE walk the identifier space the same way: start
//! from the closest peers in the routing table, ask up to alpha of them at a
//! time for peers closer still, and stop once a round brings nothing closer.

use std::collections::HashSet;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, trace};

use super::dispatcher::Dispatcher;
use super::error::DhtError;
use super::message::{DhtBody, ValueReply};
use super::node::{Contact, Distance, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    FindNode,
    FindValue,
}

/// Result of an iterative lookup.
#[derive(Debug, Clone, Default)]
pub struct LookupOutcome {
    /// Closest peers known when the lookup stopped, nearest first. Peers that
    /// failed to answer during this lookup are left out.
    pub closest: Vec<Contact>,
    /// Set when a FIND_VALUE lookup found the key.
    pub value: Option<Bytes>,
    pub rounds: usize,
    pub queried: usize,
    /// The node shut down mid-lookup; `closest` is whatever was known by then.
    pub cancelled: bool,
}

impl LookupOutcome {
    pub fn found(&self) -> bool {
        self.value.is_some()
    }
}

struct Candidate {
    contact: Contact,
    distance: Distance,
    queried: bool,
}

/// The evolving candidate set of one lookup, kept sorted by distance to the
/// target and trimmed to `k`.
struct Shortlist {
    target: NodeId,
    k: usize,
    candidates: Vec<Candidate>,
    seen: HashSet<NodeId>,
}

impl Shortlist {
    fn new(target: NodeId, k: usize, our_id: NodeId) -> Self {
        let mut seen = HashSet::new();
        seen.insert(our_id);

        Self {
            target,
            k,
            candidates: Vec::with_capacity(k),
            seen,
        }
    }

    fn best(&self) -> Option<Distance> {
        self.candidates.first().map(|c| c.distance)
    }

    /// Adds unseen contacts. Returns true if any of them is closer than
    /// `best_before`.
    fn merge(
        &mut self,
        contacts: impl IntoIterator<Item = Contact>,
        best_before: Option<Distance>,
    ) -> bool {
        let mut improved = false;

        for contact in contacts {
            if !self.seen.insert(contact.id) {
                continue;
            }

            let distance = contact.id.distance(&self.target);
            improved |= best_before.map_or(true, |best| distance < best);
            self.candidates.push(Candidate {
                contact,
                distance,
                queried: false,
            });
        }

        self.candidates.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then_with(|| a.contact.id.cmp(&b.contact.id))
        });
        self.candidates.truncate(self.k);
        improved
    }

    /// Picks up to `alpha` of the closest unqueried candidates and marks them
    /// queried.
    fn next_batch(&mut self, alpha: usize) -> Vec<Contact> {
        self.candidates
            .iter_mut()
            .filter(|c| !c.queried)
            .take(alpha)
            .map(|c| {
                c.queried = true;
                c.contact
            })
            .collect()
    }

    fn remove(&mut self, id: &NodeId) {
        self.candidates.retain(|c| &c.contact.id != id);
    }

    fn into_contacts(self) -> Vec<Contact> {
        self.candidates.into_iter().map(|c| c.contact).collect()
    }
}

impl Dispatcher {
    /// Runs an iterative lookup for `target`.
    ///
    /// Unresponsive peers are charged a failure in the routing table by
    /// [`request`](Self::request) and simply drop out of this lookup's
    /// shortlist; they never turn into an error here.
    pub async fn lookup(&self, target: NodeId, kind: LookupKind) -> LookupOutcome {
        let config = self.config();
        let mut shortlist = Shortlist::new(target, config.k, *self.our_id());
        let seeds = self.routing_table().closest(&target, config.k);
        shortlist.merge(seeds.iter().map(|n| n.contact()), None);

        let mut outcome = LookupOutcome::default();
        let mut answered_without_value: Vec<Contact> = Vec::new();

        while outcome.rounds < config.max_lookup_rounds {
            if self.cancellation().is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let batch = shortlist.next_batch(config.alpha);
            if batch.is_empty() {
                break;
            }

            outcome.rounds += 1;
            outcome.queried += batch.len();
            let best_before = shortlist.best();

            let requests = batch.iter().map(|contact| {
                let body = match kind {
                    LookupKind::FindNode => DhtBody::FindNode { target },
                    LookupKind::FindValue => DhtBody::FindValue { key: target },
                };
                async move {
                    let result = self.request(contact.addr, Some(contact.id), body).await;
                    (*contact, result)
                }
            });

            let results = tokio::select! {
                results = join_all(requests) => results,
                _ = self.cancellation().cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
            };

            let mut improved = false;
            let mut found = None;

            for (contact, result) in results {
                match result {
                    Ok(reply) => match reply.body {
                        DhtBody::FindNodeResponse { nodes }
                        | DhtBody::FindValueResponse(ValueReply::Nodes(nodes)) => {
                            improved |= shortlist.merge(nodes, best_before);
                            answered_without_value.push(contact);
                        }
                        DhtBody::FindValueResponse(ValueReply::Found(value))
                            if kind == LookupKind::FindValue =>
                        {
                            if found.is_none() {
                                found = Some((value, contact));
                            }
                        }
                        other => {
                            debug!(
                                "Unexpected {:?} from {} during lookup",
                                other.kind(),
                                contact.addr
                            );
                        }
                    },
                    Err(DhtError::Cancelled) => outcome.cancelled = true,
                    Err(e) => {
                        trace!("Lookup query to {} failed: {}", contact.addr, e);
                        shortlist.remove(&contact.id);
                    }
                }
            }

            if let Some((value, holder)) = found {
                debug!("Found value for {} at {}", target, holder.addr);
                self.cache_value(target, &value, &answered_without_value).await;
                outcome.value = Some(value);
                break;
            }

            if outcome.cancelled || !improved {
                break;
            }
        }

        debug!(
            "Lookup for {} finished after {} rounds, {} queried",
            target, outcome.rounds, outcome.queried
        );

        outcome.closest = shortlist.into_contacts();
        outcome
    }

    /// Writes a found value back to the closest peer that answered without it.
    async fn cache_value(&self, key: NodeId, value: &Bytes, answered: &[Contact]) {
        let Some(nearest) = answered.iter().min_by_key(|c| c.id.distance(&key)) else {
            return;
        };

        if let Err(e) = self.store_at(*nearest, key, value.clone()).await {
            debug!("Failed to cache value at {}: {}", nearest.addr, e);
        }
    }
}
