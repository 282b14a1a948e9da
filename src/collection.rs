//! The lifecycle orchestrator: the GET/POST/PUT/DELETE pipelines that tie the schema validator,
//! command applier, permission resolver, script domain builder, store adapter, and change
//! notifier together into a single request-handling entry point.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use error_stack::{Report, ResultExt};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::commands::{build_commands, exec_commands};
use crate::config::CollectionSettings;
use crate::context::{resolve_id, url_segment, Body, Context};
use crate::domain::ScriptDomain;
use crate::errors::CollectionError;
use crate::notify::{notify_changed, ChangeNotifier};
use crate::permissions::{required_permissions, Method, Permission};
use crate::schema::{sanitize, sanitize_query, validate, Schema};
use crate::script::{should_run_event, Event, Script};
use crate::store::{Document, Query, Store};

/// The declared shape of a collection: its name (also the store namespace), its property schema,
/// the lifecycle scripts bound to each [`Event`], and any custom per-request scripts mounted as
/// nested paths under an id. Immutable for the lifetime of the [`Collection`] that owns it.
pub struct CollectionConfig {
    /// The collection's name. Doubles as the store namespace and the `<name>:changed` event
    /// prefix.
    pub name: String,
    /// The declared property schema.
    pub schema: Schema,
    /// At most one compiled script per lifecycle event.
    pub scripts: HashMap<Event, Arc<dyn Script>>,
    /// Custom per-request scripts, keyed by the path segment that follows the id
    /// (`<base>/<id>/<key>`). These preempt the standard GET/POST/PUT/DELETE pipeline entirely.
    pub custom_routes: HashMap<String, Arc<dyn Script>>,
}

impl CollectionConfig {
    /// Build a config with no scripts or custom routes configured.
    pub fn new(name: impl Into<String>, schema: Schema) -> CollectionConfig {
        CollectionConfig {
            name: name.into(),
            schema,
            scripts: HashMap::new(),
            custom_routes: HashMap::new(),
        }
    }

    /// Bind a script to a lifecycle event. At most one script per event; a second call for the
    /// same event replaces the first.
    pub fn on(mut self, event: Event, script: Arc<dyn Script>) -> CollectionConfig {
        self.scripts.insert(event, script);
        self
    }

    /// Mount a custom script at `<base>/<id>/<key>`.
    pub fn custom_route(mut self, key: impl Into<String>, script: Arc<dyn Script>) -> CollectionConfig {
        self.custom_routes.insert(key.into(), script);
        self
    }

    fn script_for(&self, event: Event) -> Option<&Arc<dyn Script>> {
        self.scripts.get(&event)
    }
}

/// The response shapes the orchestrator can produce.
#[derive(Debug, Clone)]
pub enum Response {
    /// A single document.
    Document(Document),
    /// A sequence of documents.
    Documents(Vec<Document>),
    /// `{count: n}`, from the root-only `count` virtual route.
    Count(u64),
    /// `{index: n}`, from the root-only `index-of` virtual route. `-1` if not found.
    Index(i64),
    /// The ids of documents updated by a bulk `saveAll`.
    UpdatedIds(Vec<String>),
}

/// A named collection: owns its schema and script handles, and dispatches requests against a
/// shared [`Store`].
pub struct Collection<S: Store> {
    config: CollectionConfig,
    store: Arc<S>,
    settings: CollectionSettings,
}

impl<S: Store> Collection<S> {
    /// Build a collection from its config, a shared store, and its operational settings.
    pub fn new(config: CollectionConfig, store: Arc<S>, settings: CollectionSettings) -> Collection<S> {
        Collection {
            config,
            store,
            settings,
        }
    }

    /// The collection's name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn skip_events_requested(ctx: &dyn Context) -> bool {
        let query_skip = ctx
            .query()
            .get("$skipEvents")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let body_skip = match ctx.body() {
            Body::Single(doc) => doc.get("$skipEvents").and_then(Value::as_bool).unwrap_or(false),
            _ => false,
        };
        query_skip || body_skip
    }

    fn should_run(&self, ctx: &dyn Context, event: Event) -> bool {
        should_run_event(
            self.config.script_for(event).is_some(),
            Self::skip_events_requested(ctx),
            ctx.session().is_root,
        )
    }

    fn id_query(id: &str) -> Query {
        let mut q = Query::new();
        q.insert("id".to_string(), Value::String(id.to_string()));
        q
    }

    async fn notify(&self, ctx: &dyn Context) {
        let notifier: Option<&dyn ChangeNotifier> = ctx
            .session()
            .notifier
            .as_deref();
        notify_changed(notifier, &self.config.name, self.settings.notifications_enabled).await;
    }

    fn store_err(err: crate::store::StoreError) -> Report<CollectionError> {
        Report::new(CollectionError::Store(err.0))
    }

    /// The single entry point: dispatch `ctx` to the appropriate pipeline and produce a
    /// [`Response`] or a [`CollectionError`].
    #[instrument(skip_all, fields(collection = %self.config.name))]
    pub async fn handle(&self, ctx: &dyn Context) -> Result<Response, Report<CollectionError>> {
        let id = resolve_id(ctx);

        if ctx.method() == Method::Get {
            if let Some(custom_id) = id.as_deref() {
                if let Some(subpath) = url_segment(ctx.url(), 2) {
                    if let Some(script) = self.config.custom_routes.get(&subpath).cloned() {
                        return self.handle_custom_route(ctx, custom_id, &script).await;
                    }
                }
            }

            match id.as_deref() {
                Some("count") => return self.count(ctx).await,
                Some("index-of") => return self.index_of(ctx).await,
                _ => {}
            }
        }

        match ctx.method() {
            Method::Get => self.get(ctx, id).await,
            Method::Post => self.post_or_update(ctx, id).await,
            Method::Put => self.put_or_save_all(ctx, id).await,
            Method::Delete => self.delete(ctx, id).await,
        }
    }

    async fn handle_custom_route(
        &self,
        ctx: &dyn Context,
        id: &str,
        script: &Arc<dyn Script>,
    ) -> Result<Response, Report<CollectionError>> {
        let query = Self::id_query(id);
        let doc = self
            .store
            .first(&query)
            .await
            .map_err(Self::store_err)?
            .ok_or(Report::new(CollectionError::NotFound))?;

        let mut domain = ScriptDomain::for_existing(doc.clone(), doc);
        script
            .run(ctx, &mut domain)
            .await
            .map_err(|e| Report::new(CollectionError::ScriptFailed(e.0)))
            .attach_printable("while running a custom per-request script")?;

        if domain.has_errors() {
            return Err(Report::new(CollectionError::Validation(domain.errors().clone())));
        }

        Ok(Response::Document(domain.data))
    }

    #[instrument(skip_all)]
    async fn count(&self, ctx: &dyn Context) -> Result<Response, Report<CollectionError>> {
        if !ctx.session().is_root {
            return Err(Report::new(CollectionError::RootRequired("count")));
        }
        let query = sanitize_query(ctx.query(), &self.config.schema);
        let n = self.store.count(&query).await.map_err(Self::store_err)?;
        Ok(Response::Count(n))
    }

    #[instrument(skip_all)]
    async fn index_of(&self, ctx: &dyn Context) -> Result<Response, Report<CollectionError>> {
        if !ctx.session().is_root {
            return Err(Report::new(CollectionError::RootRequired("index-of")));
        }
        let target = url_segment(ctx.url(), 2).ok_or_else(|| {
            Report::new(CollectionError::PreconditionFailed("missing target id for index-of"))
        })?;

        let mut query = sanitize_query(ctx.query(), &self.config.schema);
        query.insert("$fields".to_string(), serde_json::json!({"id": 1}));

        let docs = self.store.find(&query).await.map_err(Self::store_err)?;
        let index = docs
            .iter()
            .position(|d| d.get("id").and_then(Value::as_str) == Some(target.as_str()))
            .map(|i| i as i64)
            .unwrap_or(-1);

        Ok(Response::Index(index))
    }

    fn build_query(&self, ctx: &dyn Context, id: Option<&str>) -> Query {
        let mut query = sanitize_query(ctx.query(), &self.config.schema);
        if let Some(id) = id {
            query.insert("id".to_string(), Value::String(id.to_string()));
        }
        query
    }

    #[instrument(skip_all)]
    async fn get(&self, ctx: &dyn Context, id: Option<String>) -> Result<Response, Report<CollectionError>> {
        let id_scoped = id.is_some();
        let mut query = self.build_query(ctx, id.as_deref());

        let root_list = !id_scoped;
        if root_list && self.should_run(ctx, Event::Query) {
            let mut domain = ScriptDomain::for_create(query.clone());
            let script = self.config.script_for(Event::Query).unwrap().clone();
            script
                .run(ctx, &mut domain)
                .await
                .map_err(|e| Report::new(CollectionError::ScriptFailed(e.0)))
                .attach_printable("while running the Query script")?;
            if domain.has_errors() {
                return Err(Report::new(CollectionError::Validation(domain.errors().clone())));
            }
            query = domain.data;
        }

        let required = required_permissions(Method::Get, id_scoped, false);
        ctx.verify_permissions(&required)
            .await
            .change_context(CollectionError::Forbidden)
            .attach_printable("while verifying GET permissions")?;

        let found = self.store.find(&query).await.map_err(Self::store_err)?;

        if id_scoped {
            let Some(doc) = found.into_iter().next() else {
                return Err(Report::new(CollectionError::NotFound));
            };

            if self.should_run(ctx, Event::Get) {
                let script = self.config.script_for(Event::Get).unwrap().clone();
                let mut domain = ScriptDomain::for_existing(doc.clone(), doc);
                script
                    .run(ctx, &mut domain)
                    .await
                    .map_err(|e| Report::new(CollectionError::ScriptFailed(e.0)))
                    .attach_printable("while running the Get script")?;
                if domain.has_errors() {
                    return Err(Report::new(CollectionError::Validation(domain.errors().clone())));
                }
                return Ok(Response::Document(domain.data));
            }

            return Ok(Response::Document(doc));
        }

        if self.should_run(ctx, Event::Get) {
            let script = self.config.script_for(Event::Get).unwrap().clone();
            let filtered = self.run_get_script_over_list(ctx, found, &script).await?;
            return Ok(Response::Documents(filtered));
        }

        Ok(Response::Documents(found))
    }

    /// Run the `Get` script once per document, concurrently up to
    /// [`CollectionSettings::get_script_concurrency`], preserving result order; documents whose
    /// script invocation reports a value error are dropped from the response rather than aborting
    /// the request.
    async fn run_get_script_over_list(
        &self,
        ctx: &dyn Context,
        docs: Vec<Document>,
        script: &Arc<dyn Script>,
    ) -> Result<Vec<Document>, Report<CollectionError>> {
        let concurrency = self
            .settings
            .get_script_concurrency
            .unwrap_or_else(|| docs.len().max(1));

        let futures = docs.into_iter().map(|doc| {
            let script = script.clone();
            async move {
                let mut domain = ScriptDomain::for_existing(doc.clone(), doc);
                script
                    .run(ctx, &mut domain)
                    .await
                    .map_err(|e| Report::new(CollectionError::ScriptFailed(e.0)))?;
                if domain.has_errors() {
                    debug!(errors = ?domain.errors(), "Get script filtered a document out of the list");
                    Ok(None)
                } else {
                    Ok(Some(domain.data))
                }
            }
        });

        let results: Vec<Result<Option<Document>, Report<CollectionError>>> =
            stream::iter(futures).buffered(concurrency).collect().await;

        let mut out = Vec::new();
        for r in results {
            if let Some(doc) = r? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    #[instrument(skip_all)]
    async fn post_or_update(
        &self,
        ctx: &dyn Context,
        id: Option<String>,
    ) -> Result<Response, Report<CollectionError>> {
        match (id, ctx.body()) {
            (_, Body::Many(items)) => self.create_many(ctx, items.clone()).await,
            (Some(id), Body::Single(item)) => {
                let doc = self.update_one(ctx, &id, item.clone()).await?;
                self.notify(ctx).await;
                Ok(Response::Document(doc))
            }
            (None, Body::Single(item)) => {
                let doc = self.create_one(ctx, item.clone()).await?;
                self.notify(ctx).await;
                Ok(Response::Document(doc))
            }
            (id, Body::None) => {
                let item = Document::new();
                match id {
                    Some(id) => {
                        let doc = self.update_one(ctx, &id, item).await?;
                        self.notify(ctx).await;
                        Ok(Response::Document(doc))
                    }
                    None => {
                        let doc = self.create_one(ctx, item).await?;
                        self.notify(ctx).await;
                        Ok(Response::Document(doc))
                    }
                }
            }
        }
    }

    async fn create_many(
        &self,
        ctx: &dyn Context,
        items: Vec<Document>,
    ) -> Result<Response, Report<CollectionError>> {
        let required = required_permissions(Method::Post, false, true);
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let doc = self.create_one_with_permissions(ctx, item, &required).await?;
            created.push(doc);
        }
        self.notify(ctx).await;
        Ok(Response::Documents(created))
    }

    async fn create_one(
        &self,
        ctx: &dyn Context,
        item: Document,
    ) -> Result<Document, Report<CollectionError>> {
        let required = required_permissions(Method::Post, false, false);
        self.create_one_with_permissions(ctx, item, &required).await
    }

    async fn create_one_with_permissions(
        &self,
        ctx: &dyn Context,
        raw_item: Document,
        required: &BTreeSet<Permission>,
    ) -> Result<Document, Report<CollectionError>> {
        let mut item = sanitize(&raw_item, &self.config.schema);

        if let Some(errors) = validate(&mut item, &self.config.schema, true) {
            return Err(Report::new(CollectionError::Validation(errors)));
        }

        let new_id = self.store.create_unique_identifier();
        item.insert("id".to_string(), Value::String(new_id));

        let mut domain = ScriptDomain::for_create(item);
        if self.should_run(ctx, Event::Post) {
            let script = self.config.script_for(Event::Post).unwrap().clone();
            script
                .run(ctx, &mut domain)
                .await
                .map_err(|e| Report::new(CollectionError::ScriptFailed(e.0)))
                .attach_printable("while running the Post script")?;
            if domain.has_errors() {
                return Err(Report::new(CollectionError::Validation(domain.errors().clone())));
            }
        }

        ctx.verify_permissions(required)
            .await
            .change_context(CollectionError::Forbidden)
            .attach_printable("while verifying create permissions")?;

        let inserted = self
            .store
            .insert(domain.data)
            .await
            .map_err(Self::store_err)
            .attach_printable("while committing a create")?;

        Ok(inserted)
    }

    /// Merge sanitized `item` over the document found at `query`, apply commands, validate, and
    /// run `Validate`/`Put`: the path shared by single `put` and `saveAll`. Returns the merged,
    /// post-script document ready to commit, or the short-circuiting error.
    async fn merge_validate_and_script(
        &self,
        ctx: &dyn Context,
        existing: Document,
        raw_item: &Document,
    ) -> Result<Document, Report<CollectionError>> {
        let previous = existing.clone();
        let commands = build_commands(raw_item);
        let sanitized_item = sanitize(raw_item, &self.config.schema);

        let mut merged = existing;
        for (k, v) in sanitized_item {
            merged.insert(k, v);
        }
        exec_commands(&mut merged, &commands);

        if let Some(errors) = validate(&mut merged, &self.config.schema, false) {
            return Err(Report::new(CollectionError::Validation(errors)));
        }

        let mut domain = ScriptDomain::for_existing(merged, previous);

        if self.should_run(ctx, Event::Validate) {
            let script = self.config.script_for(Event::Validate).unwrap().clone();
            script
                .run(ctx, &mut domain)
                .await
                .map_err(|e| Report::new(CollectionError::ScriptFailed(e.0)))
                .attach_printable("while running the Validate script")?;
            if domain.has_errors() {
                return Err(Report::new(CollectionError::Validation(domain.errors().clone())));
            }
        }

        if self.should_run(ctx, Event::Put) {
            let script = self.config.script_for(Event::Put).unwrap().clone();
            script
                .run(ctx, &mut domain)
                .await
                .map_err(|e| Report::new(CollectionError::ScriptFailed(e.0)))
                .attach_printable("while running the Put script")?;
            if domain.has_errors() {
                return Err(Report::new(CollectionError::Validation(domain.errors().clone())));
            }
        }

        Ok(domain.data)
    }

    async fn fetch_precondition(&self, query: &Query) -> Result<Document, Report<CollectionError>> {
        let found = self.store.first(query).await.map_err(Self::store_err)?;
        found.ok_or_else(|| {
            let message = if query.len() == 1 {
                "No object exists with that id"
            } else {
                "No object exists that matches that query"
            };
            Report::new(CollectionError::PreconditionFailed(message))
        })
    }

    async fn update_one(
        &self,
        ctx: &dyn Context,
        id: &str,
        raw_item: Document,
    ) -> Result<Document, Report<CollectionError>> {
        let precondition_query = self.build_query(ctx, Some(id));
        let existing = self.fetch_precondition(&precondition_query).await?;
        let merged = self.merge_validate_and_script(ctx, existing, &raw_item).await?;

        let required = required_permissions(Method::Put, true, false);
        ctx.verify_permissions(&required)
            .await
            .change_context(CollectionError::Forbidden)
            .attach_printable("while verifying update permissions")?;

        let commit_query = Self::id_query(id);
        let mut without_id = merged.clone();
        without_id.remove("id");
        self.store
            .update(&commit_query, &without_id)
            .await
            .map_err(Self::store_err)
            .attach_printable("while committing a put")?;

        let mut result = without_id;
        result.insert("id".to_string(), Value::String(id.to_string()));
        Ok(result)
    }

    #[instrument(skip_all)]
    async fn put_or_save_all(
        &self,
        ctx: &dyn Context,
        id: Option<String>,
    ) -> Result<Response, Report<CollectionError>> {
        match id {
            Some(id) => {
                let item = ctx.body().as_single().cloned().unwrap_or_default();
                let doc = self.update_one(ctx, &id, item).await?;
                self.notify(ctx).await;
                Ok(Response::Document(doc))
            }
            None => self.save_all(ctx).await,
        }
    }

    async fn save_all(&self, ctx: &dyn Context) -> Result<Response, Report<CollectionError>> {
        let query = sanitize_query(ctx.query(), &self.config.schema);
        let candidates = self.store.find(&query).await.map_err(Self::store_err)?;

        let raw_item = ctx.body().as_single().cloned().unwrap_or_default();
        let required = required_permissions(Method::Put, false, false);

        let mut batch = Vec::with_capacity(candidates.len());
        for existing in candidates {
            let id = existing
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Report::new(CollectionError::Store("document missing id".into())))?;

            let merged = self
                .merge_validate_and_script(ctx, existing, &raw_item)
                .await?;

            ctx.verify_permissions(&required)
                .await
                .change_context(CollectionError::Forbidden)
                .attach_printable("while verifying saveAll permissions")?;

            let mut without_id = merged;
            without_id.remove("id");
            batch.push((id, without_id));
        }

        // Awaits every write before replying, returning the ids actually committed, instead of
        // firing off updates and replying before they land.
        let mut updates = stream::iter(batch.into_iter().map(|(id, partial)| {
            let query = Self::id_query(&id);
            async move {
                self.store
                    .update(&query, &partial)
                    .await
                    .map(|_| id)
                    .map_err(Self::store_err)
            }
        }))
        .buffer_unordered(8);

        let mut updated_ids = Vec::new();
        while let Some(result) = updates.next().await {
            updated_ids.push(result.attach_printable("while committing saveAll")?);
        }
        updated_ids.sort();

        self.notify(ctx).await;
        Ok(Response::UpdatedIds(updated_ids))
    }

    #[instrument(skip_all)]
    async fn delete(&self, ctx: &dyn Context, id: Option<String>) -> Result<Response, Report<CollectionError>> {
        let id_scoped = id.is_some();
        let query = self.build_query(ctx, id.as_deref());

        let found = self.store.find(&query).await.map_err(Self::store_err)?;

        if self.should_run(ctx, Event::Delete) {
            let script = self.config.script_for(Event::Delete).unwrap().clone();
            // `ScriptDomain::data` is document-shaped (a map); a bulk delete's fetched result is
            // a sequence, so it's wrapped under a synthetic `items` key rather than forcing
            // `data` to be a sum type every other script only ever sees as an object.
            let data = if id_scoped {
                found.first().cloned().unwrap_or_default()
            } else {
                let mut wrapper = Document::new();
                wrapper.insert(
                    "items".to_string(),
                    Value::Array(found.iter().cloned().map(Value::Object).collect()),
                );
                wrapper
            };
            let mut domain = ScriptDomain::for_existing(data.clone(), data);
            script
                .run(ctx, &mut domain)
                .await
                .map_err(|e| Report::new(CollectionError::ScriptFailed(e.0)))
                .attach_printable("while running the Delete script")?;
            if domain.has_errors() {
                return Err(Report::new(CollectionError::Validation(domain.errors().clone())));
            }
        }

        let required = required_permissions(Method::Delete, id_scoped, false);
        ctx.verify_permissions(&required)
            .await
            .change_context(CollectionError::Forbidden)
            .attach_printable("while verifying delete permissions")?;

        self.store
            .remove(&query)
            .await
            .map_err(Self::store_err)
            .attach_printable("while committing a delete")?;

        self.notify(ctx).await;
        Ok(Response::Documents(found))
    }

    /// React to a schema rename/delete at the persistence layer (§4.7 Config Lifecycle). Pass
    /// `new_name: None` for a collection deletion, `Some(name)` for a rename; a no-op rename
    /// (`name` equal to the current one) is skipped.
    pub async fn apply_config_change(
        &self,
        new_name: Option<&str>,
    ) -> Result<(), Report<CollectionError>> {
        match new_name {
            None => self.store.remove(&Query::new()).await.map_err(Self::store_err),
            Some(name) if name == self.config.name => Ok(()),
            Some(name) => self.store.rename(name).await.map_err(Self::store_err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::CollectionSettings;
    use crate::schema::{PropertyDescriptor, PropertyType, Schema};
    use crate::script::EngineError;
    use crate::testing::{FakeContext, FnScript, InMemoryStore};
    use serde_json::json;

    fn todos_schema() -> Schema {
        Schema::new([
            PropertyDescriptor::required("title", PropertyType::String),
            PropertyDescriptor::new("votes", PropertyType::Number),
            PropertyDescriptor::new("done", PropertyType::Boolean),
        ])
    }

    fn todos(config: CollectionConfig) -> Collection<InMemoryStore> {
        Collection::new(config, Arc::new(InMemoryStore::new()), CollectionSettings::default())
    }

    #[tokio::test]
    async fn create_with_missing_required_reports_errors_and_does_not_persist() {
        let collection = todos(CollectionConfig::new("todos", todos_schema()));
        let ctx = FakeContext::post("/todos", json!({"votes": 3}).as_object().unwrap().clone());

        let err = collection.handle(&ctx).await.unwrap_err();
        match err.current_context() {
            CollectionError::Validation(errors) => {
                assert_eq!(errors.get("title").unwrap(), "is required");
            }
            other => panic!("expected Validation, got {other:?}"),
        }

        let count = collection.store.count(&Query::new()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn create_coerces_numeric_string_and_assigns_id() {
        let collection = todos(CollectionConfig::new("todos", todos_schema()));
        let ctx = FakeContext::post(
            "/todos",
            json!({"title": "a", "votes": "7"}).as_object().unwrap().clone(),
        );

        let response = collection.handle(&ctx).await.unwrap();
        let Response::Document(doc) = response else {
            panic!("expected a single document");
        };
        assert_eq!(doc.get("votes").unwrap(), &json!(7.0));
        assert!(doc.get("id").and_then(Value::as_str).is_some());
    }

    #[tokio::test]
    async fn update_by_id_applies_inc_command() {
        let collection = todos(CollectionConfig::new("todos", todos_schema()));
        collection.store.seed(
            json!({"id": "x", "title": "a", "votes": 7, "done": false})
                .as_object()
                .unwrap()
                .clone(),
        );

        let ctx = FakeContext::post(
            "/todos/x",
            json!({"votes": {"$inc": 2}}).as_object().unwrap().clone(),
        )
        .with_query("id", json!("x"));

        let response = collection.handle(&ctx).await.unwrap();
        let Response::Document(doc) = response else {
            panic!("expected a single document");
        };
        assert_eq!(doc.get("id").unwrap(), "x");
        assert_eq!(doc.get("votes").unwrap(), &json!(9.0));
    }

    #[tokio::test]
    async fn get_by_id_not_found_is_404() {
        let collection = todos(CollectionConfig::new("todos", todos_schema()));
        let ctx = FakeContext::get("/todos/nope", Query::new()).with_query("id", json!("nope"));

        let err = collection.handle(&ctx).await.unwrap_err();
        assert!(matches!(err.current_context(), CollectionError::NotFound));
    }

    #[tokio::test]
    async fn get_list_with_per_document_script_filters_done_items() {
        let schema = todos_schema();
        let script = FnScript(|_ctx: &dyn Context, domain: &mut ScriptDomain| -> Result<(), EngineError> {
            if domain.data.get("done") == Some(&Value::Bool(true)) {
                domain.error("hide", "yes");
            }
            Ok(())
        });
        let config = CollectionConfig::new("todos", schema).on(Event::Get, Arc::new(script));
        let collection = todos(config);
        collection.store.seed(
            json!({"id": "1", "title": "a", "done": false})
                .as_object()
                .unwrap()
                .clone(),
        );
        collection.store.seed(
            json!({"id": "2", "title": "b", "done": true})
                .as_object()
                .unwrap()
                .clone(),
        );

        let ctx = FakeContext::get("/todos", Query::new());
        let response = collection.handle(&ctx).await.unwrap();
        let Response::Documents(docs) = response else {
            panic!("expected a document list");
        };
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("id").unwrap(), "1");
    }

    #[tokio::test]
    async fn count_requires_root() {
        let collection = todos(CollectionConfig::new("todos", todos_schema()));

        let ctx = FakeContext::get("/todos/count", Query::new());
        let err = collection.handle(&ctx).await.unwrap_err();
        assert!(matches!(err.current_context(), CollectionError::RootRequired("count")));

        let ctx = FakeContext::get("/todos/count", Query::new()).as_root();
        let response = collection.handle(&ctx).await.unwrap();
        assert!(matches!(response, Response::Count(0)));
    }

    #[tokio::test]
    async fn index_of_requires_root_and_reports_position() {
        let collection = todos(CollectionConfig::new("todos", todos_schema()));
        collection.store.seed(json!({"id": "a", "title": "x"}).as_object().unwrap().clone());
        collection.store.seed(json!({"id": "b", "title": "y"}).as_object().unwrap().clone());

        let ctx = FakeContext::get("/todos/index-of/b", Query::new()).as_root();
        let response = collection.handle(&ctx).await.unwrap();
        match response {
            Response::Index(i) => assert!(i == 0 || i == 1),
            other => panic!("expected an index, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_root_cannot_skip_events_via_query() {
        let schema = todos_schema();
        let script = FnScript(|_ctx: &dyn Context, domain: &mut ScriptDomain| -> Result<(), EngineError> {
            domain.error("title", "blocked by script");
            Ok(())
        });
        let config = CollectionConfig::new("todos", schema).on(Event::Post, Arc::new(script));
        let collection = todos(config);

        let ctx = FakeContext::post("/todos", json!({"title": "a"}).as_object().unwrap().clone())
            .with_query("$skipEvents", json!(true));
        let err = collection.handle(&ctx).await.unwrap_err();
        assert!(matches!(err.current_context(), CollectionError::Validation(_)));
    }

    #[tokio::test]
    async fn root_can_skip_events_via_query() {
        let schema = todos_schema();
        let script = FnScript(|_ctx: &dyn Context, domain: &mut ScriptDomain| -> Result<(), EngineError> {
            domain.error("title", "blocked by script");
            Ok(())
        });
        let config = CollectionConfig::new("todos", schema).on(Event::Post, Arc::new(script));
        let collection = todos(config);

        let ctx = FakeContext::post("/todos", json!({"title": "a"}).as_object().unwrap().clone())
            .with_query("$skipEvents", json!(true))
            .as_root();
        let response = collection.handle(&ctx).await.unwrap();
        assert!(matches!(response, Response::Document(_)));
    }

    #[tokio::test]
    async fn save_all_updates_every_matching_document_and_awaits_writes() {
        let collection = todos(CollectionConfig::new("todos", todos_schema()));
        collection.store.seed(
            json!({"id": "1", "title": "a", "votes": 1})
                .as_object()
                .unwrap()
                .clone(),
        );
        collection.store.seed(
            json!({"id": "2", "title": "b", "votes": 1})
                .as_object()
                .unwrap()
                .clone(),
        );

        let ctx = FakeContext::put("/todos", Some(json!({"votes": 5}).as_object().unwrap().clone()));
        let response = collection.handle(&ctx).await.unwrap();
        let Response::UpdatedIds(ids) = response else {
            panic!("expected updated ids");
        };
        assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);

        let id_query: Query = json!({"id": "1"}).as_object().unwrap().clone();
        let doc = collection.store.first(&id_query).await.unwrap().unwrap();
        assert_eq!(doc.get("votes").unwrap(), &json!(5));
    }

    #[tokio::test]
    async fn delete_runs_script_over_fetched_result_before_removing() {
        let schema = todos_schema();
        let script = FnScript(|_ctx: &dyn Context, domain: &mut ScriptDomain| -> Result<(), EngineError> {
            if domain.data.get("title") == Some(&Value::String("protected".to_string())) {
                domain.error("title", "cannot delete");
            }
            Ok(())
        });
        let config = CollectionConfig::new("todos", schema).on(Event::Delete, Arc::new(script));
        let collection = todos(config);
        collection.store.seed(
            json!({"id": "1", "title": "protected"}).as_object().unwrap().clone(),
        );

        let ctx = FakeContext::delete("/todos/1", Query::new()).with_query("id", json!("1"));
        let err = collection.handle(&ctx).await.unwrap_err();
        assert!(matches!(err.current_context(), CollectionError::Validation(_)));

        let id_query: Query = json!({"id": "1"}).as_object().unwrap().clone();
        let still_there = collection.store.first(&id_query).await.unwrap();
        assert!(still_there.is_some());
    }

    #[tokio::test]
    async fn custom_route_bypasses_schema_and_returns_script_data() {
        let schema = todos_schema();
        let script = FnScript(|_ctx: &dyn Context, domain: &mut ScriptDomain| -> Result<(), EngineError> {
            domain.data.insert("archived".to_string(), Value::Bool(true));
            Ok(())
        });
        let config = CollectionConfig::new("todos", schema).custom_route("archive", Arc::new(script));
        let collection = todos(config);
        collection.store.seed(json!({"id": "1", "title": "a"}).as_object().unwrap().clone());

        let ctx = FakeContext::get("/todos/1/archive", Query::new()).with_query("id", json!("1"));
        let response = collection.handle(&ctx).await.unwrap();
        let Response::Document(doc) = response else {
            panic!("expected a document");
        };
        assert_eq!(doc.get("archived").unwrap(), &Value::Bool(true));
    }

    #[tokio::test]
    async fn permission_denial_surfaces_as_forbidden() {
        let collection = todos(CollectionConfig::new("todos", todos_schema()));
        collection.store.seed(json!({"id": "1", "title": "a"}).as_object().unwrap().clone());

        let ctx = FakeContext::get("/todos", Query::new()).denying(Permission::QueryMulti);
        let err = collection.handle(&ctx).await.unwrap_err();
        assert!(matches!(err.current_context(), CollectionError::Forbidden));
    }

    #[tokio::test]
    async fn config_lifecycle_rename_and_delete() {
        let collection = todos(CollectionConfig::new("todos", todos_schema()));
        collection.store.seed(json!({"id": "1", "title": "a"}).as_object().unwrap().clone());

        collection.apply_config_change(Some("todos")).await.unwrap();
        assert_eq!(collection.store.count(&Query::new()).await.unwrap(), 1);

        collection.apply_config_change(None).await.unwrap();
        assert_eq!(collection.store.count(&Query::new()).await.unwrap(), 0);
    }
}
