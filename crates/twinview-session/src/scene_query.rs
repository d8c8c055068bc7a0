//! Sensor discovery in a loaded scene
//!
//! Each catalog query is searched by name; every matching object is expanded
//! to its fragments (recursively, so grouped instances count) and every
//! fragment yields one world position.

use glam::Mat4;
use std::sync::Arc;
use tracing::{debug, warn};
use twinview_core::{position_from_transform, FragmentId, ObjectId, ResolvedSensor, SensorQuery};

use crate::engine::{SceneEngine, SceneError};

/// Why a query (or part of it) produced no placement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryMiss {
    NoMatches { query: SensorQuery },
    NoFragments { query: SensorQuery, object_id: ObjectId },
    SearchFailed { query: SensorQuery, error: SceneError },
    MissingTransform { query: SensorQuery, fragment_id: FragmentId },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    pub resolved: Vec<ResolvedSensor>,
    pub misses: Vec<QueryMiss>,
}

pub struct SceneQuery {
    engine: Arc<dyn SceneEngine>,
}

impl SceneQuery {
    pub fn new(engine: Arc<dyn SceneEngine>) -> Self {
        Self { engine }
    }

    /// Objects matching `name`; an empty result is not an error
    pub async fn find_objects_by_name(&self, name: &str) -> Result<Vec<ObjectId>, SceneError> {
        let ids = self.engine.search(name).await?;
        if ids.is_empty() {
            warn!(query = %name, "No objects match sensor query");
        }
        Ok(ids)
    }

    /// All fragments of `object`, including nested ones
    pub async fn resolve_fragments(&self, object: ObjectId) -> Result<Vec<FragmentId>, SceneError> {
        let fragments = self.engine.enumerate_fragments(object, true).await?;
        if fragments.is_empty() {
            warn!(object = %object, "Object has no fragments");
        }
        Ok(fragments)
    }

    pub fn world_transform(&self, fragment: FragmentId) -> Result<Mat4, SceneError> {
        self.engine
            .world_matrix(fragment)
            .ok_or(SceneError::FragmentNotFound(fragment))
    }

    /// Resolve every query; a failing query never prevents the others
    pub async fn discover(&self, queries: &[SensorQuery]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for query in queries {
            let objects = match self.find_objects_by_name(query.as_str()).await {
                Ok(objects) if objects.is_empty() => {
                    report.misses.push(QueryMiss::NoMatches {
                        query: query.clone(),
                    });
                    continue;
                }
                Ok(objects) => objects,
                Err(error) => {
                    warn!(query = %query, "Sensor search failed: {}", error);
                    report.misses.push(QueryMiss::SearchFailed {
                        query: query.clone(),
                        error,
                    });
                    continue;
                }
            };

            for object_id in objects {
                let fragments = match self.resolve_fragments(object_id).await {
                    Ok(fragments) => fragments,
                    Err(error) => {
                        warn!(object = %object_id, "Fragment enumeration failed: {}", error);
                        Vec::new()
                    }
                };
                if fragments.is_empty() {
                    report.misses.push(QueryMiss::NoFragments {
                        query: query.clone(),
                        object_id,
                    });
                    continue;
                }

                for fragment_id in fragments {
                    match self.world_transform(fragment_id) {
                        Ok(matrix) => {
                            let world_position = position_from_transform(&matrix);
                            debug!(
                                query = %query,
                                object = %object_id,
                                fragment = %fragment_id,
                                "Resolved sensor at {}",
                                world_position
                            );
                            report.resolved.push(ResolvedSensor {
                                query: query.clone(),
                                object_id,
                                fragment_id,
                                world_position,
                            });
                        }
                        Err(error) => {
                            warn!("{}", error);
                            report.misses.push(QueryMiss::MissingTransform {
                                query: query.clone(),
                                fragment_id,
                            });
                        }
                    }
                }
            }
        }

        report
    }
}
