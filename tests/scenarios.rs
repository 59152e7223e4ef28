use rand::rngs::StdRng;
use rand::SeedableRng;

use word_rnn::sampler::LogUniformSampler;
use word_rnn::{BatchFeeder, CellKind, Config, Generator, Model, ModelDims, TokenGrid, Trainer};

#[test]
fn scenario_a_grid_and_batches() {
    let tokens: Vec<usize> = (0..10).collect();
    let grid = TokenGrid::build(&tokens, 2, 2).unwrap();
    assert_eq!(grid.row(0), &[0, 1, 2, 3, 4]);
    assert_eq!(grid.row(1), &[5, 6, 7, 8, 9]);

    let feeder = BatchFeeder::new(grid, 2);
    assert_eq!(feeder.len(), 2);
    let mut batches: Vec<_> = feeder.epoch(&mut StdRng::seed_from_u64(1)).collect();
    batches.sort_by_key(|b| b.start);
    assert_eq!(batches[0].inputs, vec![vec![0, 1], vec![5, 6]]);
    assert_eq!(batches[0].targets, vec![2, 7]);
    assert_eq!(batches[1].inputs, vec![vec![1, 2], vec![6, 7]]);
    assert_eq!(batches[1].targets, vec![3, 8]);
}

#[test]
fn scenario_b_one_forward_pass_is_finite() {
    let tokens: Vec<usize> = (0..400).map(|i| (i * 37 + 11) % 100).collect();
    let feeder = BatchFeeder::new(TokenGrid::build(&tokens, 4, 5).unwrap(), 5);
    let batch = feeder.epoch(&mut StdRng::seed_from_u64(2)).next().unwrap();

    for cell in [CellKind::Gru, CellKind::Lstm] {
        let dims = ModelDims { vocab_size: 100, embed_size: 8, rnn_size: 16, hidden_size: 12, num_steps: 5, cell };
        let mut rng = StdRng::seed_from_u64(3);
        let mut model = Model::new(dims, 10, Box::new(LogUniformSampler::new(100)), &mut rng);
        let loss = model.batch_loss(&batch.inputs, &batch.targets, &mut rng);
        let g = model.graph();
        assert_eq!((g.rows(loss), g.cols(loss)), (1, 1));
        let v = g.data(loss)[0];
        assert!(v.is_finite() && v >= 0.0, "{cell:?}: {v}");
    }
}

fn cyclic_config() -> Config {
    Config {
        batch_size: 4,
        num_rnn_steps: 3,
        embed_size: 8,
        rnn_size: 12,
        hidden_size: 8,
        neg_samples: 2,
        learn_rate: 0.1,
        momentum: 0.5,
        epochs: 6,
        seed: 17,
        ..Config::default()
    }
}

#[test]
fn scenario_c_cyclic_stream_is_learned() {
    let tokens: Vec<usize> = (0..600).map(|i| 1 + i % 3).collect();
    let mut config = cyclic_config();
    let per_epoch = 600 / 4 - 3 - 1;
    config.move_avg_len = per_epoch;
    let mut trainer = Trainer::new(config, &tokens, 4, None).unwrap();
    assert_eq!(trainer.feeder().len(), per_epoch);

    let reports = trainer.run();
    assert_eq!(reports.len(), 6);
    let avgs: Vec<f32> = reports.iter().map(|r| r.moving_avg).collect();
    assert!(avgs.iter().all(|a| a.is_finite()), "{avgs:?}");
    assert!(avgs[5] < avgs[0] * 0.8, "{avgs:?}");
    assert!(avgs.windows(3).any(|w| w[0] > w[1] && w[1] > w[2]), "no three falling epochs: {avgs:?}");

    // after training the cycle continues 1 -> 2 -> 3 -> 1
    let model = trainer.into_model();
    let out = Generator::new(&model).generate(&[1, 2, 3], 6).unwrap();
    assert_eq!(out, vec![1, 2, 3, 1, 2, 3]);
}

#[test]
fn generation_is_repeatable_after_training() {
    let tokens: Vec<usize> = (0..300).map(|i| (i * i + 3 * i) % 11).collect();
    let config = Config { epochs: 1, ..cyclic_config() };
    let mut trainer = Trainer::new(config, &tokens, 11, None).unwrap();
    trainer.run();
    let model = trainer.model();
    let a = Generator::new(model).generate(&[1, 2, 3], 20).unwrap();
    let b = Generator::new(model).generate(&[1, 2, 3], 20).unwrap();
    assert_eq!(a, b);
}
