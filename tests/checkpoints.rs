use std::fs;

use word_rnn::{CheckpointError, CheckpointStore, Config, ConfigError, Error, Trainer};

fn config(epochs: usize) -> Config {
    Config {
        batch_size: 3,
        num_rnn_steps: 4,
        embed_size: 6,
        rnn_size: 8,
        hidden_size: 5,
        neg_samples: 4,
        learn_rate: 0.05,
        momentum: 0.9,
        epochs,
        keep_checkpoints: 2,
        seed: 5,
        run_id: "resume".to_string(),
        ..Config::default()
    }
}

fn corpus() -> Vec<usize> {
    (0..150).map(|i| (i * 5 + i / 7) % 20).collect()
}

#[test]
fn per_epoch_checkpoints_respect_retention() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path(), "resume", 2);
    let mut trainer = Trainer::new(config(4), &corpus(), 20, Some(store.clone())).unwrap();
    let reports = trainer.run();
    for r in &reports {
        let path = r.checkpoint.as_ref().unwrap().as_ref().unwrap();
        assert_eq!(path, &store.path_for(r.epoch));
    }
    let epochs: Vec<usize> = store.list().unwrap().into_iter().map(|(e, _)| e).collect();
    assert_eq!(epochs, vec![3, 4]);
    let cp = store.latest().unwrap();
    assert_eq!(cp.global_step, trainer.global_step());
    assert_eq!(cp.params, trainer.model().flat_params());
}

#[test]
fn resume_continues_the_global_step() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path(), "resume", 2);
    let mut first = Trainer::new(config(2), &corpus(), 20, Some(store.clone())).unwrap();
    first.run();
    let per_epoch = first.feeder().len();
    assert_eq!(first.global_step(), 2 * per_epoch);

    let mut second = Trainer::new(config(3), &corpus(), 20, Some(store.clone())).unwrap();
    assert!(second.resume().unwrap());
    assert_eq!(second.epoch(), 2);
    assert_eq!(second.global_step(), 2 * per_epoch);
    assert_eq!(second.model().flat_params(), first.model().flat_params());

    let reports = second.run();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].epoch, 3);
    assert_eq!(reports[0].global_step, 3 * per_epoch);
}

#[test]
fn resume_without_checkpoints_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path(), "empty", 2);
    let mut trainer = Trainer::new(config(1), &corpus(), 20, Some(store)).unwrap();
    assert!(!trainer.resume().unwrap());
    assert_eq!(trainer.global_step(), 0);
}

#[test]
fn resume_rejects_a_different_vocabulary() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path(), "resume", 2);
    Trainer::new(config(1), &corpus(), 20, Some(store.clone())).unwrap().run();

    let mut other = Trainer::new(config(2), &corpus(), 25, Some(store)).unwrap();
    match other.resume() {
        Err(Error::Config(ConfigError::Mismatch { what, expected, found })) => {
            assert_eq!((what, expected, found), ("vocab_size", 25, 20));
        }
        other => panic!("expected vocabulary mismatch, got {other:?}"),
    }
}

#[test]
fn failed_saves_do_not_stop_training() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, b"not a directory").unwrap();
    let store = CheckpointStore::new(&blocker, "resume", 2);
    let mut trainer = Trainer::new(config(2), &corpus(), 20, Some(store)).unwrap();
    let reports = trainer.run();
    assert_eq!(reports.len(), 2);
    for r in &reports {
        assert!(matches!(r.checkpoint, Some(Err(CheckpointError::Io { .. }))));
        assert!(r.mean_loss.is_finite());
    }
    assert_eq!(trainer.global_step(), 2 * trainer.feeder().len());
}
