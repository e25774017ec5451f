//! Location-based routing across child keepers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::keeper::BuildEnv;
use crate::plugin::{self, BuildError, ValidationError};

use super::error::{SecretError, SecretResult};
use super::keeper::Keeper;
use super::types::Secret;

/// The configuration type string for the router keeper.
pub const TYPE: &str = "router";

/// A route owning a set of locations.
#[derive(Debug)]
struct Route {
    locations: Vec<String>,
    keeper: Arc<dyn Keeper>,
}

impl Route {
    /// A location belongs to this route when it equals one of the route's
    /// locations or extends one as a `/`-joined path.
    fn owns(&self, location: &str) -> bool {
        self.locations.iter().any(|owned| {
            location == owned
                || (!owned.is_empty()
                    && location.len() > owned.len()
                    && location.starts_with(owned)
                    && location.as_bytes()[owned.len()] == b'/')
        })
    }
}

/// A keeper that routes operations to children by secret location.
///
/// Location-scoped operations go to the first route owning the location,
/// falling through to the default child. Id-scoped operations scan each
/// distinct child in route-declaration order, then the default, stopping
/// at the first success.
#[derive(Debug)]
pub struct RouterKeeper {
    routes: Vec<Route>,
    default: Arc<dyn Keeper>,
}

impl RouterKeeper {
    /// Create a router with the given default child.
    pub fn new(default: Arc<dyn Keeper>) -> Self {
        Self {
            routes: Vec::new(),
            default,
        }
    }

    /// Append a route for the given locations. Routes are consulted in
    /// the order they were added; the first route listing a location wins.
    pub fn add_route(&mut self, keeper: Arc<dyn Keeper>, locations: Vec<String>) {
        self.routes.push(Route { locations, keeper });
    }

    fn child_for(&self, location: &str) -> &Arc<dyn Keeper> {
        self.routes
            .iter()
            .find(|r| r.owns(location))
            .map(|r| &r.keeper)
            .unwrap_or(&self.default)
    }

    /// Distinct children in route-declaration order, the default last.
    fn children(&self) -> Vec<&Arc<dyn Keeper>> {
        let mut distinct: Vec<&Arc<dyn Keeper>> = Vec::with_capacity(self.routes.len() + 1);
        for route in &self.routes {
            if !distinct.iter().any(|k| Arc::ptr_eq(k, &route.keeper)) {
                distinct.push(&route.keeper);
            }
        }
        if !distinct.iter().any(|k| Arc::ptr_eq(k, &self.default)) {
            distinct.push(&self.default);
        }
        distinct
    }

    /// Find the child currently holding the identified secret.
    async fn owner_of(&self, id: &str) -> SecretResult<(&Arc<dyn Keeper>, Secret)> {
        for child in self.children() {
            match child.get_secret(id).await {
                Ok(sec) => return Ok((child, sec)),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(SecretError::not_found(id))
    }
}

#[async_trait]
impl Keeper for RouterKeeper {
    async fn list_locations(&self) -> SecretResult<Vec<String>> {
        let mut locations = BTreeSet::new();
        for child in self.children() {
            locations.extend(child.list_locations().await?);
        }
        Ok(locations.into_iter().collect())
    }

    async fn list_secrets(&self, location: &str) -> SecretResult<Vec<String>> {
        self.child_for(location).list_secrets(location).await
    }

    async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
        let (_, secret) = self.owner_of(id).await?;
        Ok(secret)
    }

    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
        let mut secrets = Vec::new();
        for child in self.children() {
            secrets.extend(child.get_secrets_by_name(name).await?);
        }
        Ok(secrets)
    }

    async fn set_secret(&self, secret: Secret) -> SecretResult<Secret> {
        self.child_for(secret.location()).set_secret(secret).await
    }

    async fn copy_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        let target = self.child_for(location);
        let (source, secret) = self.owner_of(id).await?;
        if Arc::ptr_eq(source, target) {
            return source.copy_secret(id, location).await;
        }
        target
            .set_secret(secret.with_id("").with_location(location))
            .await
    }

    async fn move_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        let target = self.child_for(location);
        let (source, secret) = self.owner_of(id).await?;
        if Arc::ptr_eq(source, target) {
            return source.move_secret(id, location).await;
        }
        let moved = target
            .set_secret(secret.with_id("").with_location(location))
            .await?;
        source.delete_secret(id).await?;
        Ok(moved)
    }

    async fn delete_secret(&self, id: &str) -> SecretResult<()> {
        let (owner, _) = self.owner_of(id).await?;
        owner.delete_secret(id).await
    }
}

/// Configuration for the router keeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Routes consulted in order.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Keeper receiving operations no route claims.
    #[serde(rename = "default")]
    pub default_route: String,
}

/// One route in a router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Locations owned by this route.
    pub locations: Vec<String>,

    /// Name of the keeper the route dispatches to.
    pub keeper: String,
}

fn build(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::BuildFuture<'_> {
    Box::pin(async move {
        let cfg: RouterConfig = env.decode(value)?;

        let default = env.build(&cfg.default_route).await?;
        let mut router = RouterKeeper::new(default);
        for route in cfg.routes {
            let keeper = env.build(&route.keeper).await?;
            router.add_route(keeper, route.locations);
        }
        Ok(Arc::new(router) as Arc<dyn Keeper>)
    })
}

fn validate(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::ValidateFuture<'_> {
    Box::pin(async move {
        let cfg: RouterConfig = env.decode(value)?;
        let mut errs = ValidationError::new();

        if cfg.default_route.is_empty() {
            errs.append(BuildError::Invalid(
                "router has no default route".to_string(),
            ));
        } else if let Err(err) = env.validate(&cfg.default_route).await {
            errs.append(err);
        }

        let mut seen = BTreeSet::new();
        for route in &cfg.routes {
            if route.locations.is_empty() {
                errs.append(BuildError::Invalid(format!(
                    "route keeper {:?} has no locations",
                    route.keeper
                )));
            }
            for location in &route.locations {
                if !seen.insert(location.clone()) {
                    tracing::warn!(
                        location = %location,
                        keeper = %route.keeper,
                        "route location is shadowed by an earlier route"
                    );
                }
            }
            if let Err(err) = env.validate(&route.keeper).await {
                errs.append(err);
            }
        }

        errs.into_result()
    })
}

/// Register the router keeper type.
pub(crate) fn register_plugin() {
    plugin::register(
        TYPE,
        plugin::RegisteredPlugin {
            description: "Route secrets to other keepers by location",
            builder: build,
            validator: Some(validate),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::memory::MemoryKeeper;

    fn router_over(mem_a: Arc<dyn Keeper>, mem_b: Arc<dyn Keeper>) -> RouterKeeper {
        let mut router = RouterKeeper::new(mem_a);
        router.add_route(mem_b, vec!["notes".to_string()]);
        router
    }

    #[tokio::test]
    async fn test_routes_by_location() {
        let mem_a: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mem_b: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let router = router_over(mem_a.clone(), mem_b.clone());

        let stored = router
            .set_secret(Secret::new("n", "u", "p").with_location("notes"))
            .await
            .unwrap();

        // Read back through the router.
        let fetched = router.get_secret(stored.id()).await.unwrap();
        assert_eq!(fetched.name(), "n");

        // The routed child holds it; the default does not.
        assert_eq!(mem_b.list_secrets("notes").await.unwrap(), vec![stored.id().to_string()]);
        assert!(mem_a.list_secrets("notes").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prefix_path_match() {
        let mem_a: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mem_b: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let router = router_over(mem_a.clone(), mem_b.clone());

        router
            .set_secret(Secret::new("n", "u", "p").with_location("notes/archive"))
            .await
            .unwrap();
        assert_eq!(mem_b.list_secrets("notes/archive").await.unwrap().len(), 1);

        // "notesx" is not a path under "notes".
        router
            .set_secret(Secret::new("m", "u", "p").with_location("notesx"))
            .await
            .unwrap();
        assert_eq!(mem_a.list_secrets("notesx").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_default_fall_through() {
        let mem_a: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mem_b: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let router = router_over(mem_a.clone(), mem_b);

        router
            .set_secret(Secret::new("d", "u", "p").with_location("misc"))
            .await
            .unwrap();
        assert_eq!(mem_a.list_secrets("misc").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_locations_unions_children() {
        let mem_a: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mem_b: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let router = router_over(mem_a, mem_b);

        router
            .set_secret(Secret::new("a", "u", "p").with_location("misc"))
            .await
            .unwrap();
        router
            .set_secret(Secret::new("b", "u", "p").with_location("notes"))
            .await
            .unwrap();

        let locs = router.list_locations().await.unwrap();
        assert!(locs.contains(&"misc".to_string()));
        assert!(locs.contains(&"notes".to_string()));
    }

    #[tokio::test]
    async fn test_get_by_name_concatenates() {
        let mem_a: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mem_b: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let router = router_over(mem_a, mem_b);

        router
            .set_secret(Secret::new("same", "a", "p"))
            .await
            .unwrap();
        router
            .set_secret(Secret::new("same", "b", "p").with_location("notes"))
            .await
            .unwrap();

        let found = router.get_secrets_by_name("same").await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_cross_child_move() {
        let mem_a: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mem_b: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let router = router_over(mem_a.clone(), mem_b.clone());

        let stored = router
            .set_secret(Secret::new("n", "u", "p").with_location("misc"))
            .await
            .unwrap();
        let moved = router.move_secret(stored.id(), "notes").await.unwrap();

        assert_eq!(moved.location(), "notes");
        assert!(mem_a.get_secret(stored.id()).await.unwrap_err().is_not_found());
        assert_eq!(mem_b.list_secrets("notes").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_scans_children() {
        let mem_a: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let mem_b: Arc<dyn Keeper> = Arc::new(MemoryKeeper::new());
        let router = router_over(mem_a, mem_b.clone());

        let stored = router
            .set_secret(Secret::new("n", "u", "p").with_location("notes"))
            .await
            .unwrap();
        router.delete_secret(stored.id()).await.unwrap();
        assert!(mem_b.get_secret(stored.id()).await.unwrap_err().is_not_found());

        let err = router.delete_secret("no-such-id").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
