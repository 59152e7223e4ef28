use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use word_rnn::sampler::build_sampler;
use word_rnn::{CheckpointStore, Config, Generator, Model, Trainer, Vocab};

const USAGE: &str = "\
Usage: word-rnn <train|generate> --corpus=PATH [--key=value ...]

  train     build the vocabulary, train, print a greedy sample
  generate  restore the newest checkpoint of --runId and extend --prompt

Options: --batchSize=32 --numRnnSteps=10 --embedSize=64 --rnnSize=128
         --hiddenSize=64 --negSamples=64 --learnRate=0.05 --momentum=0.9
         --epochs=10 --cell=gru|lstm --sampler=log_uniform|uniform --seed=0
         --runId=wordrnn --checkpointDir=./checkpoints --keepCheckpoints=5
         --genLength=50 --temperature=0 --prompt=\"...\"
Log level: RUST_LOG=debug";

fn vocab_path(config: &Config) -> PathBuf {
    config.checkpoint_dir.join(format!("{}-vocab.json", config.run_id))
}

fn read_corpus(config: &Config) -> Result<String> {
    if config.corpus.is_empty() {
        bail!("--corpus=PATH is required\n\n{USAGE}");
    }
    fs::read_to_string(&config.corpus).with_context(|| format!("reading corpus {}", config.corpus))
}

/// Last `num_steps` prompt words, left-padded with `<unk>`.
fn seed_window(vocab: &Vocab, prompt: &str, num_steps: usize) -> Vec<usize> {
    let ids = vocab.encode(prompt);
    let tail = &ids[ids.len().saturating_sub(num_steps)..];
    let mut seed = vec![0; num_steps - tail.len()];
    seed.extend_from_slice(tail);
    seed
}

fn print_sample(model: &Model, vocab: &Vocab, seed: &[usize], config: &Config) -> Result<()> {
    let mut generator = Generator::new(model);
    let out = if config.temperature > 0.0 {
        let mut rng = if config.seed == 0 { StdRng::from_entropy() } else { StdRng::seed_from_u64(config.seed) };
        generator.generate_sampled(seed, config.gen_length, config.temperature, &mut rng)?
    } else {
        generator.generate(seed, config.gen_length)?
    };
    println!("{} | {}", vocab.decode(seed), vocab.decode(&out));
    Ok(())
}

fn train(config: Config) -> Result<()> {
    let text = read_corpus(&config)?;
    let vocab = Vocab::build(&text, config.max_vocab);
    let tokens = vocab.encode(&text);
    info!(words = tokens.len(), vocab = vocab.len(), corpus = %config.corpus, "corpus loaded");

    fs::create_dir_all(&config.checkpoint_dir)
        .with_context(|| format!("creating {}", config.checkpoint_dir.display()))?;
    vocab.save(&vocab_path(&config)).context("saving vocabulary")?;

    let store = CheckpointStore::new(&config.checkpoint_dir, config.run_id.clone(), config.keep_checkpoints);
    let mut trainer = Trainer::new(config.clone(), &tokens, vocab.len(), Some(store))?;
    if trainer.resume()? {
        info!(epoch = trainer.epoch(), "continuing run {}", config.run_id);
    }
    let reports = trainer.run();
    let failed_saves = reports.iter().filter(|r| matches!(r.checkpoint, Some(Err(_)))).count();
    if failed_saves > 0 {
        warn!(failed_saves, "some checkpoints were not written");
    }

    let seed = if config.prompt.is_empty() {
        tokens[..config.num_rnn_steps].to_vec()
    } else {
        seed_window(&vocab, &config.prompt, config.num_rnn_steps)
    };
    print_sample(trainer.model(), &vocab, &seed, &config)
}

fn generate(config: Config) -> Result<()> {
    let vocab = match Vocab::load(&vocab_path(&config)) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "no saved vocabulary, rebuilding from corpus");
            Vocab::build(&read_corpus(&config)?, config.max_vocab)
        }
    };
    let store = CheckpointStore::new(&config.checkpoint_dir, config.run_id.clone(), config.keep_checkpoints);
    let cp = store.latest()?;
    if cp.dims.vocab_size != vocab.len() {
        bail!("checkpoint vocabulary ({}) does not match {} ({})",
            cp.dims.vocab_size, vocab_path(&config).display(), vocab.len());
    }
    info!(epoch = cp.epoch, step = cp.global_step, saved = %cp.timestamp, "loaded checkpoint");

    let vocab_size = cp.dims.vocab_size;
    let neg = config.neg_samples.min(vocab_size / 2).max(1);
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = Model::new(cp.dims.clone(), neg, build_sampler(config.sampler, vocab_size), &mut rng);
    cp.restore_into(&mut model, None)?;

    let seed = seed_window(&vocab, &config.prompt, cp.dims.num_steps);
    print_sample(&model, &vocab, &seed, &config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1);
    let mode = args.next().unwrap_or_default();
    let rest: Vec<String> = args.collect();
    if mode.is_empty() || mode == "--help" || mode == "-h" {
        println!("{USAGE}");
        return Ok(());
    }
    let config = Config::from_args(&rest).with_context(|| format!("\n\n{USAGE}"))?;

    match mode.as_str() {
        "train" => train(config),
        "generate" => generate(config),
        other => bail!("unknown mode {other:?}\n\n{USAGE}"),
    }
}
