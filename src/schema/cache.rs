//! Schema cache with coalesced in-flight fetches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tracing::debug;

use crate::auth::AuthSession;
use crate::config::EndpointUrl;
use crate::error::SchemaError;

use super::codec::Codec;
use super::registry::RegistryClient;

type CodecFuture = Shared<BoxFuture<'static, Result<Arc<Codec>, SchemaError>>>;

/// One cached lookup. The in-flight future itself is cached, so concurrent
/// resolves for an unseen id collapse into one fetch. The generation lets a
/// failed waiter evict exactly the fetch it awaited and nothing newer.
struct Entry {
    generation: u64,
    future: CodecFuture,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<u32, Entry>,
    generation: u64,
}

/// Maps numeric registry ids to compiled codecs, fetching each id at most
/// once concurrently.
///
/// Schemas are immutable once published under an id, so resolved entries are
/// cached for the lifetime of the process. A failed fetch is not cached; the
/// next `resolve()` for that id retries.
#[derive(Clone)]
pub struct SchemaCache {
    registry: RegistryClient,
    state: Arc<Mutex<CacheState>>,
}

impl SchemaCache {
    pub fn new(registry_url: EndpointUrl, session: AuthSession) -> Self {
        Self {
            registry: RegistryClient::new(registry_url, session),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Resolve a registry id to its compiled codec.
    pub async fn resolve(&self, id: u32) -> Result<Arc<Codec>, SchemaError> {
        // Check-then-insert happens in one synchronous step; the fetch
        // itself runs inside the shared future, outside the lock.
        let (generation, future) = {
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.entries.get(&id) {
                (entry.generation, entry.future.clone())
            } else {
                state.generation += 1;
                let generation = state.generation;
                let registry = self.registry.clone();
                let future = async move {
                    let definition = registry.fetch(id).await?;
                    let codec = Codec::compile(&definition)
                        .map_err(|e| SchemaError::compile(id, e.to_string()))?;
                    Ok(Arc::new(codec))
                }
                .boxed()
                .shared();
                state.entries.insert(
                    id,
                    Entry {
                        generation,
                        future: future.clone(),
                    },
                );
                debug!(id, "schema fetch started");
                (generation, future)
            }
        };

        match future.await {
            Ok(codec) => Ok(codec),
            Err(err) => {
                let mut state = self.state.lock().unwrap();
                if state
                    .entries
                    .get(&id)
                    .is_some_and(|entry| entry.generation == generation)
                {
                    state.entries.remove(&id);
                }
                Err(err)
            }
        }
    }
}
