//! End-to-end pipeline tests over the built-in stages

use folio_cache::{CacheOutcome, CacheStore, FsStore, FsStoreConfig, MemoryStore};
use folio_events::{ContentHandler, Event, StreamError};
use folio_plan::{ConfigNode, LanguageRegistry, StageNode, TreeBuilder};
use folio_runtime::{
    CancellationToken, Engine, EngineConfig, ProcessingError, Request, StageArgs, StageInstance, StageProvider,
    StageRegistry, Transform,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

fn site() -> ConfigNode {
    ConfigNode::container()
        .child(ConfigNode::stage("source", "text").attr("content", "Hello {name}"))
        .child(
            ConfigNode::stage("transform", "wrap")
                .attr("element", "page")
                .attr("label", "content"),
        )
        .child(ConfigNode::stage("sink", "xml"))
        .child(
            ConfigNode::view("raw")
                .attr("from-label", "content")
                .child(ConfigNode::stage("sink", "text")),
        )
        .child(
            ConfigNode::view("bare")
                .attr("from-label", "content")
                .attr("splice", "replace")
                .child(ConfigNode::stage("transform", "identity")),
        )
        .child(
            ConfigNode::view("plain")
                .attr("from-label", "content")
                .attr("splice", "before")
                .child(ConfigNode::stage("sink", "text")),
        )
}

fn engine_with(root: &ConfigNode, registry: StageRegistry, store: Arc<dyn CacheStore>, config: EngineConfig) -> Engine {
    Engine::build(root, Arc::new(registry), &LanguageRegistry::builtins(), store, config).unwrap()
}

fn engine(root: &ConfigNode) -> Engine {
    engine_with(
        root,
        StageRegistry::with_builtins(),
        Arc::new(MemoryStore::new()),
        EngineConfig::default(),
    )
}

fn hello() -> Request {
    Request::new("/hello").with_param("name", "World")
}

/// Fails on the first character event
struct Explode;

impl Transform for Explode {
    fn transform(&mut self, event: Event, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        match event {
            Event::Characters(_) => Err(StreamError::stage("explode", "boom")),
            other => out.handle(other),
        }
    }
}

/// Swallows every end element
struct DropEnds;

impl Transform for DropEnds {
    fn transform(&mut self, event: Event, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        match event {
            Event::EndElement { .. } => Ok(()),
            other => out.handle(other),
        }
    }
}

/// Cancels its token on the first character event
struct CancelOnText(CancellationToken);

impl Transform for CancelOnText {
    fn transform(&mut self, event: Event, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        if matches!(event, Event::Characters(_)) {
            self.0.cancel();
        }
        out.handle(event)
    }
}

struct CountingProvider {
    inner: StageRegistry,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl CountingProvider {
    fn new(inner: StageRegistry) -> Self {
        Self {
            inner,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }
}

impl StageProvider for CountingProvider {
    fn acquire(&self, node: &StageNode, args: &StageArgs<'_>) -> Result<StageInstance, ProcessingError> {
        let stage = self.inner.acquire(node, args)?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(stage)
    }

    fn release(&self, type_id: &str, stage: StageInstance) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release(type_id, stage);
    }
}

fn counting_engine(root: &ConfigNode, registry: StageRegistry) -> (Engine, Arc<CountingProvider>) {
    let tree = TreeBuilder::new(&LanguageRegistry::builtins(), &registry)
        .build(root)
        .unwrap();
    let provider = Arc::new(CountingProvider::new(registry));
    let engine = Engine::new(
        Arc::new(tree),
        provider.clone(),
        Arc::new(MemoryStore::new()),
        EngineConfig::default(),
    );
    (engine, provider)
}

#[test]
fn test_default_and_view_outputs() {
    let engine = engine(&site());

    let full = engine.execute(&hello()).unwrap();
    assert_eq!(full.mime_type, "text/xml");
    assert_eq!(full.body_text(), format!("{}<page><text>Hello World</text></page>", XML_DECL));

    let raw = engine.execute(&hello().with_view("raw")).unwrap();
    assert_eq!(raw.mime_type, "text/plain");
    assert_eq!(raw.body_text(), "Hello World");
}

#[test]
fn test_view_shares_cached_prefix() {
    let engine = engine(&site());
    assert_eq!(engine.execute(&hello()).unwrap().cache, CacheOutcome::Miss);
    // source and wrap form the same prefix whichever sink follows
    assert_eq!(engine.execute(&hello().with_view("raw")).unwrap().cache, CacheOutcome::Hit);
}

#[test]
fn test_replace_and_before_splices() {
    let engine = engine(&site());

    let bare = engine.execute(&hello().with_view("bare")).unwrap();
    assert_eq!(bare.body_text(), format!("{}<text>Hello World</text>", XML_DECL));

    let plain = engine.execute(&hello().with_view("plain")).unwrap();
    assert_eq!(plain.body_text(), "Hello World");
}

#[test]
fn test_repeat_request_hits_cache() {
    let engine = engine(&site());

    let first = engine.execute(&hello()).unwrap();
    let second = engine.execute(&hello()).unwrap();
    assert_eq!(first.cache, CacheOutcome::Miss);
    assert_eq!(second.cache, CacheOutcome::Hit);
    assert_eq!(first.body, second.body);
    assert_ne!(first.execution, second.execution);

    let other = engine
        .execute(&Request::new("/hello").with_param("name", "Moon"))
        .unwrap();
    assert_eq!(other.cache, CacheOutcome::Miss);
    assert!(other.body_text().contains("Hello Moon"));

    let stats = engine.cache().stats();
    assert_eq!((stats.hits, stats.misses, stats.stores), (1, 2, 2));
}

// Runs `requests` twice through one engine and checks every response
// against a fresh engine that has never cached anything
fn assert_replay_matches_fresh(root: &ConfigNode, requests: &[Request]) {
    let shared = engine(root);
    for round in 0..2 {
        for request in requests {
            let served = shared.execute(request).unwrap();
            let fresh = engine(root).execute(request).unwrap();
            assert_eq!(fresh.cache, CacheOutcome::Miss);
            assert_eq!(
                served.body_text(),
                fresh.body_text(),
                "round {} request {:?} ({:?})",
                round,
                request,
                served.cache
            );
        }
    }
}

#[test]
fn test_parameter_order_shares_one_document() {
    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "parameters"))
        .child(ConfigNode::stage("sink", "xml"));
    let shared = engine(&root);

    let ab = Request::new("/").with_param("a", "1").with_param("b", "2");
    let ba = Request::new("/").with_param("b", "2").with_param("a", "1");
    let first = shared.execute(&ab).unwrap();
    let second = shared.execute(&ba).unwrap();
    assert_eq!(first.cache, CacheOutcome::Miss);
    assert_eq!(second.cache, CacheOutcome::Hit);
    assert_eq!(second.body, first.body);
    assert_eq!(second.body, engine(&root).execute(&ba).unwrap().body);
    assert!(first
        .body_text()
        .contains("<param name=\"a\">1</param><param name=\"b\">2</param>"));
}

#[test]
fn test_wrap_prefix_is_part_of_the_key() {
    let wrap = |prefix: &str| {
        ConfigNode::stage("transform", "wrap")
            .attr("element", "page")
            .attr("namespace", "urn:x")
            .attr("prefix", prefix)
    };
    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "text").attr("content", "x"))
        .child(
            ConfigNode::select("parameter")
                .child(ConfigNode::when("p=a").child(wrap("a")))
                .child(ConfigNode::otherwise().child(wrap("b"))),
        )
        .child(ConfigNode::stage("sink", "xml"));
    let engine = engine(&root);

    let a = engine.execute(&Request::new("/").with_param("p", "a")).unwrap();
    let b = engine.execute(&Request::new("/")).unwrap();
    assert_eq!(b.cache, CacheOutcome::Miss);
    assert_eq!(
        a.body_text(),
        format!("{}<a:page xmlns:a=\"urn:x\"><text>x</text></a:page>", XML_DECL)
    );
    assert_eq!(
        b.body_text(),
        format!("{}<b:page xmlns:b=\"urn:x\"><text>x</text></b:page>", XML_DECL)
    );
}

#[test]
fn test_cached_builtins_replay_what_they_produce() {
    let parameters = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "parameters"))
        .child(ConfigNode::stage("sink", "xml"));
    assert_replay_matches_fresh(
        &parameters,
        &[
            Request::new("/").with_param("a", "1").with_param("b", "2"),
            Request::new("/").with_param("b", "2").with_param("a", "1"),
            Request::new("/").with_param("a", "2").with_param("b", "1"),
            Request::new("/").with_param("a", "1"),
            Request::new("/").with_param("ab", "").with_param("c", "1"),
            Request::new("/").with_param("a", "bc").with_param("c", "1"),
            Request::new("/"),
        ],
    );

    let branch = |test: &str, element: &str, namespace: Option<&str>, prefix: Option<&str>| {
        let mut wrap = ConfigNode::stage("transform", "wrap").attr("element", element);
        if let Some(namespace) = namespace {
            wrap = wrap.attr("namespace", namespace);
        }
        if let Some(prefix) = prefix {
            wrap = wrap.attr("prefix", prefix);
        }
        ConfigNode::when(test).child(wrap)
    };
    let wraps = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "text").attr("content", "{body}"))
        .child(
            ConfigNode::select("parameter")
                .child(branch("w=1", "page", None, None))
                .child(branch("w=2", "doc", None, None))
                .child(branch("w=3", "page", Some("urn:x"), None))
                .child(branch("w=4", "page", Some("urn:y"), None))
                .child(branch("w=5", "page", Some("urn:x"), Some("a")))
                .child(branch("w=6", "page", Some("urn:x"), Some("b"))),
        )
        .child(ConfigNode::stage("sink", "xml"));
    let requests: Vec<Request> = (1..=6)
        .flat_map(|w| {
            ["x", "y"].map(|body| {
                Request::new("/")
                    .with_param("w", w.to_string())
                    .with_param("body", body)
            })
        })
        .collect();
    assert_replay_matches_fresh(&wraps, &requests);
}

#[test]
fn test_select_on_request_parameter() {
    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "text").attr("content", "x"))
        .child(
            ConfigNode::select("parameter")
                .child(ConfigNode::when("lang=fr").child(ConfigNode::stage("transform", "wrap").attr("element", "fr")))
                .child(ConfigNode::when("lang=de").child(ConfigNode::stage("transform", "wrap").attr("element", "de")))
                .child(ConfigNode::otherwise().child(ConfigNode::stage("transform", "wrap").attr("element", "en"))),
        )
        .child(ConfigNode::stage("sink", "xml"));
    let engine = engine(&root);

    let de = engine.execute(&Request::new("/").with_param("lang", "de")).unwrap();
    assert_eq!(de.body_text(), format!("{}<de><text>x</text></de>", XML_DECL));
    let other = engine.execute(&Request::new("/").with_param("lang", "it")).unwrap();
    assert_eq!(other.body_text(), format!("{}<en><text>x</text></en>", XML_DECL));
}

#[test]
fn test_switch_on_path() {
    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "parameters"))
        .child(
            ConfigNode::select("path-switch")
                .child(ConfigNode::case("/docs").child(ConfigNode::stage("transform", "wrap").attr("element", "docs")))
                .child(ConfigNode::otherwise().child(ConfigNode::stage("transform", "identity"))),
        )
        .child(ConfigNode::stage("sink", "xml"));
    let engine = engine(&root);

    let docs = engine.execute(&Request::new("/docs").with_param("q", "1")).unwrap();
    assert_eq!(
        docs.body_text(),
        format!(
            "{}<docs><params xmlns=\"urn:folio:params\"><param name=\"q\">1</param></params></docs>",
            XML_DECL
        )
    );
    let blog = engine.execute(&Request::new("/blog")).unwrap();
    assert!(blog.body_text().starts_with(&format!("{}<params", XML_DECL)));
}

#[test]
fn test_failing_stage_releases_everything() {
    let mut registry = StageRegistry::with_builtins();
    registry.register_transform("explode", |_args| Ok(Explode));
    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "text").attr("content", "x"))
        .child(ConfigNode::stage("transform", "identity"))
        .child(ConfigNode::stage("transform", "explode"))
        .child(ConfigNode::stage("sink", "xml"));
    let (engine, provider) = counting_engine(&root, registry);

    let err = engine.execute(&Request::new("/")).unwrap_err();
    assert_eq!(err, ProcessingError::Stream(StreamError::stage("explode", "boom")));
    assert_eq!(provider.acquired.load(Ordering::SeqCst), 4);
    assert_eq!(provider.released.load(Ordering::SeqCst), 4);

    engine.execute(&Request::new("/")).unwrap_err();
    assert_eq!(provider.released.load(Ordering::SeqCst), 8);
    // a failed production stores nothing
    assert!(engine.cache().store().is_empty());
}

#[test]
fn test_acquire_failure_releases_earlier_stages() {
    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "text").attr("content", "x"))
        .child(ConfigNode::stage("transform", "wrap").attr("element", "{missing}"))
        .child(ConfigNode::stage("sink", "xml"));
    let (engine, provider) = counting_engine(&root, StageRegistry::with_builtins());

    let err = engine.execute(&Request::new("/")).unwrap_err();
    assert!(matches!(err, ProcessingError::Parameter { .. }));
    assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(provider.released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cancellation() {
    let engine = engine(&site());
    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(
        engine.execute_with_cancel(&hello(), token),
        Err(ProcessingError::Cancelled)
    );

    let token = CancellationToken::new();
    let trigger = token.clone();
    let mut registry = StageRegistry::with_builtins();
    registry.register_transform("cancel", move |_args| Ok(CancelOnText(trigger.clone())));
    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "text").attr("content", "x"))
        .child(ConfigNode::stage("transform", "cancel"))
        .child(ConfigNode::stage("sink", "xml"));
    let (engine, provider) = counting_engine(&root, registry);

    assert_eq!(
        engine.execute_with_cancel(&Request::new("/"), token),
        Err(ProcessingError::Cancelled)
    );
    assert_eq!(provider.released.load(Ordering::SeqCst), 3);
}

#[test]
fn test_view_errors() {
    let root = ConfigNode::container()
        .child(ConfigNode::stage("source", "text").attr("content", "x"))
        .child(
            ConfigNode::select("parameter").child(
                ConfigNode::when("debug").child(
                    ConfigNode::stage("transform", "identity").attr("label", "debug"),
                ),
            ),
        )
        .child(ConfigNode::stage("sink", "xml"))
        .child(
            ConfigNode::view("trace")
                .attr("from-label", "debug")
                .child(ConfigNode::stage("sink", "text")),
        );
    let engine = engine(&root);

    assert_eq!(
        engine.execute(&Request::new("/").with_view("nope")),
        Err(ProcessingError::UnknownView { view: "nope".into() })
    );
    assert_eq!(
        engine.execute(&Request::new("/").with_view("trace")),
        Err(ProcessingError::ViewNotReached { view: "trace".into() })
    );
    let traced = engine
        .execute(&Request::new("/").with_param("debug", "1").with_view("trace"))
        .unwrap();
    assert_eq!(traced.body_text(), "x");
}

#[test]
fn test_malformed_chain() {
    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "text").attr("content", "x"))
        .child(ConfigNode::stage("sink", "xml"))
        .child(ConfigNode::stage("transform", "identity"));
    let engine = engine(&root);
    assert!(matches!(
        engine.execute(&Request::new("/")),
        Err(ProcessingError::MalformedChain { .. })
    ));
}

#[test]
fn test_balance_validator() {
    let mut registry = StageRegistry::with_builtins();
    registry.register_transform("drop-ends", |_args| Ok(DropEnds));
    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "text").attr("content", "x"))
        .child(ConfigNode::stage("transform", "drop-ends"))
        .child(ConfigNode::stage("sink", "xml"));

    let checked = engine_with(
        &root,
        registry.clone(),
        Arc::new(MemoryStore::new()),
        EngineConfig::default(),
    );
    assert!(matches!(
        checked.execute(&Request::new("/")),
        Err(ProcessingError::Stream(StreamError::Unbalanced { .. }))
    ));

    let unchecked = engine_with(
        &root,
        registry,
        Arc::new(MemoryStore::new()),
        EngineConfig::default().with_validate_balance(false),
    );
    let response = unchecked.execute(&Request::new("/")).unwrap();
    assert_eq!(response.body_text(), format!("{}<text>x", XML_DECL));
}

#[test]
fn test_file_source_revalidates_on_change() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.txt");
    std::fs::write(&path, "first").unwrap();

    let root = ConfigNode::sequence()
        .child(ConfigNode::stage("source", "file").attr("src", path.display().to_string()))
        .child(ConfigNode::stage("sink", "text"));
    let engine = engine(&root);

    assert_eq!(engine.execute(&Request::new("/")).unwrap().cache, CacheOutcome::Miss);
    assert_eq!(engine.execute(&Request::new("/")).unwrap().cache, CacheOutcome::Hit);

    std::fs::write(&path, "second").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();

    let changed = engine.execute(&Request::new("/")).unwrap();
    assert_eq!(changed.cache, CacheOutcome::Miss);
    assert_eq!(changed.body_text(), "second");
}

#[test]
fn test_file_store_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let open = || -> Arc<dyn CacheStore> {
        Arc::new(FsStore::open(FsStoreConfig::default().with_dir(dir.path())).unwrap())
    };

    let first = engine_with(&site(), StageRegistry::with_builtins(), open(), EngineConfig::default());
    assert_eq!(first.execute(&hello()).unwrap().cache, CacheOutcome::Miss);
    drop(first);

    let second = engine_with(&site(), StageRegistry::with_builtins(), open(), EngineConfig::default());
    let response = second.execute(&hello()).unwrap();
    assert_eq!(response.cache, CacheOutcome::Hit);
    assert_eq!(response.body_text(), format!("{}<page><text>Hello World</text></page>", XML_DECL));
}

#[test]
fn test_concurrent_requests_share_engine() {
    let engine = Arc::new(engine(&site()));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let request = Request::new("/").with_param("name", format!("n{}", i % 2));
                engine.execute(&request).unwrap().body_text()
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert!(handle.join().unwrap().contains(&format!("Hello n{}", i % 2)));
    }
}
