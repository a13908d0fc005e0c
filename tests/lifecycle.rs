//! Lifecycle state machine and concurrency guarantees against a stub
//! engine.

mod helpers;

use colloquy::app::App;
use colloquy::models::ModelState;
use helpers::{test_workspace, StubEngine};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn concurrent_starts_issue_one_engine_call() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b"]);
    // Long enough that the calls overlap, short of the 1s start timeout.
    *engine.start_delay.lock().unwrap() = Some(Duration::from_millis(500));
    let app = App::with_engine(config, engine.clone()).unwrap();

    let lifecycle_a = app.lifecycle.clone();
    let lifecycle_b = app.lifecycle.clone();
    let a = tokio::spawn(async move { lifecycle_a.start("llama3.2:3b").await });
    let b = tokio::spawn(async move { lifecycle_b.start("llama3.2:3b").await });

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(
        engine.start_calls.load(Ordering::SeqCst),
        1,
        "second start must join the in-flight one, not duplicate it"
    );
    assert_eq!(app.lifecycle.state_of("llama3.2:3b"), ModelState::Running);
}

#[tokio::test(start_paused = true)]
async fn start_timeout_reverts_to_stopped_and_allows_retry() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b"]);
    *engine.start_delay.lock().unwrap() = Some(Duration::from_secs(30));
    let app = App::with_engine(config, engine.clone()).unwrap();

    let err = app.lifecycle.start("llama3.2:3b").await.unwrap_err();
    assert_eq!(err.kind(), "start_timeout");
    assert_eq!(app.lifecycle.state_of("llama3.2:3b"), ModelState::Stopped);

    // With the delay gone, the same model starts cleanly.
    *engine.start_delay.lock().unwrap() = None;
    app.lifecycle.start("llama3.2:3b").await.unwrap();
    assert_eq!(app.lifecycle.state_of("llama3.2:3b"), ModelState::Running);
}

#[tokio::test]
async fn stop_returns_model_to_stopped() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b"]);
    let app = App::with_engine(config, engine.clone()).unwrap();

    app.lifecycle.start("llama3.2:3b").await.unwrap();
    app.lifecycle.stop("llama3.2:3b").await.unwrap();

    assert_eq!(app.lifecycle.state_of("llama3.2:3b"), ModelState::Stopped);
    assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1);
    assert!(engine.running.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stop_reconciles_models_loaded_outside_this_process() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b"]);
    // Loaded engine-side, never observed here.
    engine.set_running(&["llama3.2:3b"]);
    let app = App::with_engine(config, engine.clone()).unwrap();

    app.lifecycle.stop("llama3.2:3b").await.unwrap();

    assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1);
    assert!(engine.running.lock().unwrap().is_empty());
    assert_eq!(app.lifecycle.state_of("llama3.2:3b"), ModelState::Stopped);
}

#[tokio::test]
async fn stop_of_an_already_stopped_model_is_a_no_op() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b"]);
    let app = App::with_engine(config, engine.clone()).unwrap();

    app.lifecycle.stop("llama3.2:3b").await.unwrap();
    assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn distinct_models_transition_independently() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b", "mistral"]);
    let app = App::with_engine(config, engine.clone()).unwrap();

    app.lifecycle.start("llama3.2:3b").await.unwrap();
    app.lifecycle.start("mistral").await.unwrap();

    assert_eq!(engine.start_calls.load(Ordering::SeqCst), 2);
    assert_eq!(app.lifecycle.state_of("llama3.2:3b"), ModelState::Running);
    assert_eq!(app.lifecycle.state_of("mistral"), ModelState::Running);
}

#[tokio::test]
async fn select_starts_and_records_the_model() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b", "mistral"]);
    let app = App::with_engine(config, engine.clone()).unwrap();

    app.lifecycle.select("mistral").await.unwrap();

    assert_eq!(app.lifecycle.selected_model().as_deref(), Some("mistral"));
    assert!(engine.running.lock().unwrap().contains(&"mistral".to_string()));

    // The selected model becomes the default for requests naming none.
    let resolved = app.lifecycle.resolve_model(None).await.unwrap();
    assert_eq!(resolved, "mistral");
}

#[tokio::test]
async fn select_unknown_model_is_invalid_selection() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b"]);
    let app = App::with_engine(config, engine.clone()).unwrap();

    let err = app.lifecycle.select("ghost").await.unwrap_err();
    assert_eq!(err.kind(), "invalid_selection");
    assert!(app.lifecycle.selected_model().is_none());
    assert_eq!(engine.start_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn resolve_model_prefers_known_bases_when_nothing_selected() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["zzz-custom-base", "llama2", "mistral"]);
    let app = App::with_engine(config, engine).unwrap();

    // llama3.2:3b is absent; llama2 is the first preferred base present.
    let resolved = app.lifecycle.resolve_model(None).await.unwrap();
    assert_eq!(resolved, "llama2");
}

#[tokio::test]
async fn resolve_model_prefers_trained_models() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b", "mistral-trained"]);
    let app = App::with_engine(config, engine).unwrap();

    let resolved = app.lifecycle.resolve_model(None).await.unwrap();
    assert_eq!(resolved, "mistral-trained");
}

#[tokio::test]
async fn ensure_running_reconciles_engine_side_state() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b"]);
    // Running engine-side, but this process never started it.
    engine.set_running(&["llama3.2:3b"]);
    let app = App::with_engine(config, engine.clone()).unwrap();

    app.lifecycle.ensure_running("llama3.2:3b").await.unwrap();

    assert_eq!(app.lifecycle.state_of("llama3.2:3b"), ModelState::Running);
    assert_eq!(
        engine.start_calls.load(Ordering::SeqCst),
        0,
        "already-running model must not be started again"
    );
}

#[tokio::test]
async fn delete_clears_selection_and_state() {
    let (_tmp, config) = test_workspace();
    let engine = StubEngine::with_models(&["llama3.2:3b"]);
    let app = App::with_engine(config, engine.clone()).unwrap();

    app.lifecycle.select("llama3.2:3b").await.unwrap();
    app.lifecycle.delete("llama3.2:3b").await.unwrap();

    assert!(app.lifecycle.selected_model().is_none());
    assert!(engine.installed.lock().unwrap().is_empty());
    assert_eq!(app.lifecycle.state_of("llama3.2:3b"), ModelState::Stopped);
}
