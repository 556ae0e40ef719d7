//! End-to-end tests against a scripted engine running as a real child process.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use uci_client::{
    EngineConfig, EngineError, GoParameters, OptionValue, PreconditionError, TimeControl,
    UciEngine, Variant,
};

/// Handshake plus per-command behavior, in `case` syntax. Every command the
/// engine receives is appended to `commands.log` first.
fn write_engine(dir: &TempDir, cases: &str) -> (PathBuf, PathBuf) {
    let log = dir.path().join("commands.log");
    let script = dir.path().join("engine.sh");
    let body = format!(
        r#"echo "starting up" >&2
while read -r line; do
  echo "$line" >> "{log}"
  case "$line" in
    uci)
      echo "id name DemoEngine"
      echo "id author Nobody"
      echo "option name Hash type spin default 16 min 1 max 1024"
      echo "option name UCI_Chess960 type check default false"
      echo "option name Ponder type check default false"
      echo "uciok"
      ;;
    isready) echo "readyok" ;;
{cases}
    quit) exit 0 ;;
  esac
done
"#,
        log = log.display(),
        cases = cases
    );
    std::fs::write(&script, body).unwrap();
    (script, log)
}

fn config(script: &Path) -> EngineConfig {
    EngineConfig::new("sh").arg(script.display().to_string())
}

fn commands(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

const SEARCH: &str = r#"    go*)
      echo "info depth 1 score cp 12 pv e2e4"
      echo "info depth 2 score cp 18 pv e2e4 e7e5"
      echo "bestmove e2e4 ponder e7e5"
      ;;"#;

#[tokio::test]
async fn test_full_game_cycle() {
    let dir = TempDir::new().unwrap();
    let (script, log) = write_engine(&dir, SEARCH);

    let mut engine = UciEngine::launch(config(&script)).await.unwrap();
    assert_eq!(engine.name(), "DemoEngine");
    let names: Vec<&str> = engine
        .options()
        .unwrap()
        .iter()
        .map(|o| o.name())
        .collect();
    assert_eq!(names, vec!["Hash"]);
    assert!(engine.is_supported(Variant::Chess960).unwrap());

    assert!(engine.new_game(Variant::Standard).await.unwrap());
    engine.set_option("Hash", 64i64).await.unwrap();
    engine.set_position::<&str>(None, &[]).await.unwrap();
    let reply = engine.go(&GoParameters::default()).await.unwrap().unwrap();
    assert_eq!(reply.best_move.as_deref(), Some("e2e4"));
    assert_eq!(reply.ponder_move.as_deref(), Some("e7e5"));
    assert_eq!(reply.infos.len(), 2);

    engine.close().await.unwrap();
    assert!(!engine.is_running());
    assert_eq!(
        commands(&log),
        vec![
            "uci",
            "ucinewgame",
            "setoption name UCI_Chess960 value false",
            "isready",
            "setoption name Hash value 64",
            "position startpos",
            "go",
            "quit",
        ]
    );

    // Closing twice is harmless and sends nothing
    engine.close().await.unwrap();
    assert_eq!(commands(&log).len(), 8);
}

#[tokio::test]
async fn test_clock_follows_side_to_move() {
    let dir = TempDir::new().unwrap();
    let (script, log) = write_engine(&dir, SEARCH);
    let mut engine = UciEngine::launch(config(&script)).await.unwrap();

    let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
    engine.set_position(Some(fen), &["e7e5"]).await.unwrap();
    let params = GoParameters::with_time_control(TimeControl {
        remaining_ms: 1000,
        increment_ms: 0,
        moves_to_go: 0,
    });
    engine.go(&params).await.unwrap();
    engine.close().await.unwrap();

    let sent = commands(&log);
    assert_eq!(sent[1], format!("position fen {} moves e7e5", fen));
    assert_eq!(sent[2], "go wtime 1000");
}

#[tokio::test]
async fn test_go_before_position_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (script, log) = write_engine(&dir, SEARCH);
    let mut engine = UciEngine::launch(config(&script)).await.unwrap();

    let err = engine.go(&GoParameters::default()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Precondition(PreconditionError::NoPosition)
    ));
    engine.close().await.unwrap();
    assert_eq!(commands(&log), vec!["uci", "quit"]);
}

#[tokio::test]
async fn test_engine_dies_during_search() {
    // Closing right away races the exit watcher; repeat to cover both orders
    for _ in 0..10 {
        let dir = TempDir::new().unwrap();
        let (script, log) = write_engine(&dir, "    go*) exit 3 ;;");
        let mut engine = UciEngine::launch(config(&script)).await.unwrap();

        engine.set_position::<&str>(None, &[]).await.unwrap();
        let answer = tokio::time::timeout(
            Duration::from_secs(5),
            engine.go(&GoParameters::default()),
        )
        .await
        .expect("pending search was not released")
        .unwrap();
        assert!(answer.is_none());

        engine.close().await.unwrap();
        assert!(!engine.is_running());
        assert!(!commands(&log).contains(&"quit".to_string()));
        assert!(matches!(
            engine.set_position::<&str>(None, &[]).await,
            Err(EngineError::Precondition(PreconditionError::Closed))
        ));
    }
}

#[tokio::test]
async fn test_search_abandoned_by_timeout() {
    let dir = TempDir::new().unwrap();
    let (script, log) = write_engine(
        &dir,
        r#"    "go infinite") searching=1 ;;
    go*) echo "bestmove e2e4" ;;
    stop)
      if [ -n "$searching" ]; then
        echo "bestmove a2a3"
        searching=
      fi
      ;;
    ucinewgame) ;;"#,
    );
    let mut engine = UciEngine::launch(config(&script)).await.unwrap();
    engine.set_position::<&str>(None, &[]).await.unwrap();

    let infinite = GoParameters {
        infinite: true,
        ..Default::default()
    };
    let abandoned = tokio::time::timeout(Duration::from_millis(100), engine.go(&infinite)).await;
    assert!(abandoned.is_err());
    engine.stop().await.unwrap();

    assert!(engine.new_game(Variant::Standard).await.unwrap());
    engine.set_position::<&str>(None, &[]).await.unwrap();
    let reply = engine.go(&GoParameters::default()).await.unwrap().unwrap();
    assert_eq!(reply.best_move.as_deref(), Some("e2e4"));
    engine.close().await.unwrap();

    assert_eq!(
        commands(&log),
        vec![
            "uci",
            "position startpos",
            "go infinite",
            "stop",
            "stop",
            "ucinewgame",
            "setoption name UCI_Chess960 value false",
            "isready",
            "position startpos",
            "go",
            "quit",
        ]
    );
}

#[tokio::test]
async fn test_stop_handle_interrupts_search() {
    let dir = TempDir::new().unwrap();
    let (script, _log) = write_engine(
        &dir,
        r#"    go*) ;;
    stop) echo "bestmove a2a3" ;;"#,
    );
    let mut engine = UciEngine::launch(config(&script)).await.unwrap();
    engine.set_position::<&str>(None, &[]).await.unwrap();
    let stop = engine.stop_handle();

    let params = GoParameters {
        infinite: true,
        ..Default::default()
    };
    let (reply, stopped) = tokio::join!(engine.go(&params), async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.stop().await
    });
    stopped.unwrap();
    assert_eq!(reply.unwrap().unwrap().best_move.as_deref(), Some("a2a3"));
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_unresponsive_engine_is_killed() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("stubborn.sh");
    std::fs::write(
        &script,
        r#"while read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
  esac
done
exec sleep 30
"#,
    )
    .unwrap();

    let mut engine = UciEngine::launch(config(&script).close_timeout(Duration::from_millis(200)))
        .await
        .unwrap();
    assert_eq!(engine.name(), "?");

    let started = Instant::now();
    engine.close().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_handshake_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("broken.sh");
    std::fs::write(
        &script,
        r#"read -r line
echo "option name Hash type spin default lots"
echo "uciok"
"#,
    )
    .unwrap();

    let result = UciEngine::launch(config(&script)).await;
    assert!(matches!(result, Err(EngineError::MalformedOption(_))));
}

#[tokio::test]
async fn test_pre_init_hook_runs_before_handshake() {
    let dir = TempDir::new().unwrap();
    let (script, _log) = write_engine(&dir, SEARCH);

    let mut seen = None;
    let mut engine = UciEngine::launch_with(config(&script), |engine| {
        seen = Some((engine.name().to_string(), engine.pid()));
    })
    .await
    .unwrap();

    let (name, pid) = seen.unwrap();
    assert_eq!(name, "?");
    assert!(pid.is_some());
    assert_eq!(engine.name(), "DemoEngine");
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_button_and_invalid_option() {
    let dir = TempDir::new().unwrap();
    let (script, _log) = write_engine(&dir, SEARCH);
    let mut engine = UciEngine::launch(config(&script)).await.unwrap();

    assert!(matches!(
        engine.set_option("Hash", OptionValue::Int(0)).await,
        Err(EngineError::InvalidOptionValue { .. })
    ));
    assert!(matches!(
        engine.press_button("Ponder").await,
        Err(EngineError::UnknownOption(_))
    ));
    engine.close().await.unwrap();
}
