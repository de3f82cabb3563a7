use serde_json::json;
use tokio::sync::Notify;

use super::*;
use crate::auth::token::tests::token_expiring_in;
use crate::auth::AuthEvent;
use crate::config::{AuthConfig, RouterConfig};
use crate::core::{KeyValueStore, RouterError};
use crate::loader::ViewDescriptor;
use crate::platform::{headless, Headless, HistoryEntry};
use crate::query::ParamValue;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Page(&'static str);

impl ViewModule for Page {
    fn descriptor(&self) -> ViewDescriptor {
        ViewDescriptor::new().with_name(self.0)
    }
}

fn page(name: &'static str) -> Arc<dyn ViewModule> {
    Arc::new(Page(name))
}

fn hash_config() -> Config {
    Config::default()
}

fn auth_config() -> Config {
    Config {
        auth: AuthConfig {
            enabled: true,
            protected_routes: vec!["profile".to_string()],
            ..AuthConfig::default()
        },
        ..Config::default()
    }
}

fn builder(hl: &Headless, config: Config) -> RouterBuilder {
    hl.router_builder(config)
        .view("home", page("Home"))
        .view("profile", page("Profile"))
        .view("about", page("About"))
        .view("login", page("Login"))
        .view("404", page("NotFound"))
        .view("error", page("ErrorPage"))
}

fn setup(url: &str, config: Config) -> (Headless, Arc<Router>) {
    let hl = headless(url);
    let router = builder(&hl, config).build().unwrap();
    (hl, router)
}

#[tokio::test]
async fn test_start_in_hash_mode() {
    init_log();
    let (hl, router) = setup("http://localhost/", hash_config());

    assert_eq!(router.start().await, NavigationOutcome::Completed);
    assert_eq!(hl.host.location().hash, "#/");
    assert_eq!(router.current_route(), "home");
    assert_eq!(hl.renderer.mounted_routes(), vec!["home"]);
    assert_eq!(hl.document.containers().len(), 1);
    assert_eq!(hl.document.scroll_count(), 1);
    assert!(!router.status().is_in_flight());
}

#[tokio::test]
async fn test_home_to_profile_with_query() {
    init_log();
    let (hl, router) = setup("http://localhost/#/?lang=en", hash_config());
    router.start().await;
    assert_eq!(
        router.query().get_query_params(),
        params([("lang", "en")])
    );

    let outcome = router
        .navigate_to("profile", params([("tab", "settings")]))
        .await;
    assert_eq!(outcome, NavigationOutcome::Completed);
    assert_eq!(hl.host.location().hash, "#/profile?tab=settings");
    assert_eq!(
        router.query().get_query_params(),
        params([("tab", "settings")])
    );
    assert!(router.cache().has("component_profile"));
    assert_eq!(router.loader().stats().builds, 2);

    // the hashchange event for the same address is a no-op
    assert_eq!(router.handle_route_change().await, NavigationOutcome::Unchanged);
    assert_eq!(router.loader().stats().builds, 2);

    // only the new unit survives the transition
    assert_eq!(hl.renderer.mounted_routes(), vec!["profile"]);
    let containers = hl.document.containers();
    assert_eq!(containers.len(), 1);
    assert!(containers[0].id.starts_with("page-profile-"));
}

#[tokio::test]
async fn test_query_change_reloads_same_route() {
    init_log();
    let (hl, router) = setup("http://localhost/#/about?page=1", hash_config());
    router.start().await;
    let mounts = hl.renderer.mount_count();

    hl.host.set_url("#/about?page=2");
    assert_eq!(router.handle_route_change().await, NavigationOutcome::Completed);
    assert_eq!(hl.renderer.mount_count(), mounts + 1);
    assert_eq!(router.loader().stats().builds, 1);

    let outcome = router.set_query_params(params([("sort", "asc")]), false).await;
    assert_eq!(outcome, NavigationOutcome::Completed);
    assert_eq!(hl.host.location().hash, "#/about?page=2&sort=asc");

    let outcome = router.remove_query_params(&["page"]).await;
    assert_eq!(outcome, NavigationOutcome::Completed);
    assert_eq!(hl.host.location().hash, "#/about?sort=asc");
    assert_eq!(hl.renderer.mount_count(), mounts + 3);
}

#[tokio::test]
async fn test_expired_token_redirects_to_login() {
    init_log();
    let hl = headless("http://localhost/#/profile");
    hl.local.set("authToken", &token_expiring_in(-60));
    let router = builder(&hl, auth_config()).build().unwrap();
    let mut events = router.auth().subscribe();

    assert_eq!(router.start().await, NavigationOutcome::Redirected);
    assert_eq!(hl.local.get("authToken"), None);
    assert_eq!(hl.host.location().hash, "#/login?redirect=profile");
    assert_eq!(router.current_route(), "login");
    assert_eq!(hl.renderer.mounted_routes(), vec!["login"]);
    assert_eq!(
        router.query().get_route_param("redirect"),
        Some("profile".into())
    );
    assert!(!router.status().is_in_flight());

    let mut saw_required = false;
    while let Ok(event) = events.try_recv() {
        if let AuthEvent::AuthRequired {
            original_route,
            login_route,
        } = event
        {
            assert_eq!(original_route, "profile");
            assert_eq!(login_route, "login");
            saw_required = true;
        }
    }
    assert!(saw_required);
}

#[tokio::test]
async fn test_valid_token_reaches_protected_route() {
    init_log();
    let hl = headless("http://localhost/#/profile");
    hl.session.set("accessToken", &token_expiring_in(600));
    let router = builder(&hl, auth_config()).build().unwrap();

    assert_eq!(router.start().await, NavigationOutcome::Completed);
    assert_eq!(hl.renderer.mounted_routes(), vec!["profile"]);
}

#[tokio::test]
async fn test_navigation_dropped_while_in_flight() {
    init_log();
    let hl = headless("http://localhost/");
    let gate = Arc::new(Notify::new());
    let opened = gate.clone();
    let registry = ViewRegistry::new();
    registry.register("home", page("Home"));
    registry.register_loader("slow", move || {
        let gate = opened.clone();
        async move {
            gate.notified().await;
            Ok(page("Slow"))
        }
    });
    let router = hl
        .router_builder(hash_config())
        .registry(registry)
        .build()
        .unwrap();

    let (slow, home) = tokio::join!(router.load_route("slow"), async {
        tokio::task::yield_now().await;
        assert!(router.status().is_in_flight());
        let outcome = router.load_route("home").await;
        gate.notify_one();
        outcome
    });
    assert_eq!(slow, NavigationOutcome::Completed);
    assert_eq!(home, NavigationOutcome::Dropped);
    assert_eq!(hl.renderer.mounted_routes(), vec!["slow"]);
    assert!(!router.status().is_in_flight());
}

#[tokio::test]
async fn test_next_change_event_recovers_dropped_navigation() {
    init_log();
    let hl = headless("http://localhost/#/slow");
    let gate = Arc::new(Notify::new());
    let opened = gate.clone();
    let registry = ViewRegistry::new();
    registry.register("about", page("About"));
    registry.register_loader("slow", move || {
        let gate = opened.clone();
        async move {
            gate.notified().await;
            Ok(page("Slow"))
        }
    });
    let router = hl
        .router_builder(hash_config())
        .registry(registry)
        .build()
        .unwrap();

    let (slow, about) = tokio::join!(router.handle_route_change(), async {
        tokio::task::yield_now().await;
        hl.host.set_url("#/about?tab=team");
        let outcome = router.handle_route_change().await;
        assert_eq!(router.current_route(), "slow");
        gate.notify_one();
        outcome
    });
    assert_eq!(slow, NavigationOutcome::Completed);
    assert_eq!(about, NavigationOutcome::Dropped);
    assert_eq!(hl.renderer.mounted_routes(), vec!["slow"]);

    assert_eq!(router.handle_route_change().await, NavigationOutcome::Completed);
    assert_eq!(router.current_route(), "about");
    assert_eq!(
        router.query().get_query_param("tab"),
        Some(ParamValue::Single("team".to_string()))
    );
    assert_eq!(hl.renderer.mounted_routes(), vec!["about"]);
    assert_eq!(router.handle_route_change().await, NavigationOutcome::Unchanged);
}

#[tokio::test]
async fn test_missing_route_renders_404_view() {
    init_log();
    let (hl, router) = setup("http://localhost/#/ghost", hash_config());

    assert_eq!(
        router.start().await,
        NavigationOutcome::Failed(ErrorCode::NotFound)
    );
    assert_eq!(hl.renderer.mounted_routes(), vec!["404"]);
    assert!(hl.document.fallback().is_none());
    assert_eq!(router.status().phase(), NavigationPhase::Idle);
}

#[tokio::test]
async fn test_other_failures_render_error_view() {
    init_log();
    let hl = headless("http://localhost/#/broken");
    let router = builder(&hl, hash_config()).build().unwrap();
    router
        .loader()
        .registry()
        .register_loader("broken", || async {
            Err(RouterError::Internal("module exploded".into()))
        });

    assert_eq!(
        router.start().await,
        NavigationOutcome::Failed(ErrorCode::Internal)
    );
    let mounted = hl.renderer.mounted();
    assert_eq!(mounted.len(), 1);
    let view = &mounted[0].instance;
    assert_eq!(view.unit().route(), "error");
    assert_eq!(view.get("errorCode"), Some(json!(500)));
    assert_eq!(
        view.get("errorMessage"),
        Some(json!("The page could not be loaded."))
    );
    assert_eq!(view.get("showRetry"), Some(json!(true)));
    assert_eq!(view.get("showGoHome"), Some(json!(true)));
}

#[tokio::test]
async fn test_fallback_page_without_error_views() {
    init_log();
    let hl = headless("http://localhost/#/<b>");
    let router = hl
        .router_builder(hash_config())
        .view("home", page("Home"))
        .build()
        .unwrap();

    assert_eq!(
        router.start().await,
        NavigationOutcome::Failed(ErrorCode::NotFound)
    );
    let fallback = hl.document.fallback().unwrap();
    assert!(fallback.contains("<h1>404</h1>"));
    assert!(fallback.contains("&lt;b&gt;"));
    assert!(!fallback.contains("<b>"));
    assert!(hl.renderer.mounted().is_empty());
}

#[tokio::test]
async fn test_history_mode_push_and_replace() {
    init_log();
    let config = Config {
        router: RouterConfig {
            mode: RouterMode::History,
            base_path: "/app/".to_string(),
            ..RouterConfig::default()
        },
        ..Config::default()
    };
    let hl = headless("http://localhost/app/");
    let router = builder(&hl, config)
        .view("users", page("Users"))
        .build()
        .unwrap();
    assert_eq!(
        router.config().router.src_path,
        "http://localhost/app/src"
    );

    assert_eq!(router.start().await, NavigationOutcome::Completed);
    assert_eq!(router.current_route(), "home");

    let outcome = router.navigate_to("users", params([("page", "2")])).await;
    assert_eq!(outcome, NavigationOutcome::Completed);
    let outcome = router.set_query_params(params([("page", "3")]), false).await;
    assert_eq!(outcome, NavigationOutcome::Completed);

    assert_eq!(
        hl.host.history(),
        vec![
            HistoryEntry::Push("/app/".into()),
            HistoryEntry::Push("/app/users?page=2".into()),
            HistoryEntry::Replace("/app/users?page=3".into()),
        ]
    );
    assert_eq!(hl.host.href(), "/app/users?page=3");
}

#[tokio::test]
async fn test_route_style_applied() {
    init_log();
    let (hl, router) = setup("http://localhost/#/about", hash_config());
    hl.fetcher.insert_text(
        "http://localhost/src/styles/about.css",
        ".about { margin: 0 }",
    );

    router.start().await;
    assert_eq!(
        hl.document.style("about").as_deref(),
        Some(".about { margin: 0 }")
    );
    assert_eq!(hl.document.style("home"), None);
}

#[tokio::test]
async fn test_mounted_view_navigates_through_context() {
    init_log();
    let (hl, router) = setup("http://localhost/", hash_config());
    router.start().await;

    let view = hl.renderer.mounted()[0].instance.clone();
    assert_eq!(view.context().current_route(), "home");
    view.context()
        .navigate_to("about", QueryParams::new())
        .await
        .unwrap();
    assert_eq!(router.current_route(), "about");
    assert_eq!(hl.renderer.mounted_routes(), vec!["about"]);
}

#[tokio::test]
async fn test_context_fails_after_router_dropped() {
    init_log();
    let (hl, router) = setup("http://localhost/", hash_config());
    router.start().await;
    let view = hl.renderer.mounted()[0].instance.clone();

    router.destroy();
    drop(router);
    assert!(view
        .context()
        .navigate_to("about", QueryParams::new())
        .await
        .is_err());
}

#[tokio::test]
async fn test_destroy_resets_everything() {
    init_log();
    let (hl, router) = setup("http://localhost/#/about?x=1", hash_config());
    router.start().await;
    assert!(!router.cache().is_empty());

    router.destroy();
    assert!(hl.renderer.mounted().is_empty());
    assert!(router.cache().is_empty());
    assert!(hl.document.containers().is_empty());
    assert!(router.query().get_query_params().is_empty());
    assert_eq!(router.current_route(), "");
    assert_eq!(router.stats().phase, "idle");
}

#[test]
fn test_invalid_config_rejected() {
    init_log();
    let hl = headless("http://localhost/");
    let config = Config {
        router: RouterConfig {
            base_path: "app".to_string(),
            ..RouterConfig::default()
        },
        ..Config::default()
    };
    assert!(hl.router_builder(config).build().is_err());
}

#[tokio::test]
async fn test_stats_snapshot() {
    init_log();
    let (_hl, router) = setup("http://localhost/#/about", hash_config());
    router.start().await;
    let stats = router.stats();
    assert_eq!(stats.current_route, "about");
    assert_eq!(stats.loader.builds, 1);
    assert_eq!(stats.loader.registered_modules, 6);
    assert!(!stats.auth.enabled);
    assert!(stats.cache.categories.components >= 1);
}
