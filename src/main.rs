use std::{env, path::Path, process, sync::Arc};

use anyhow::Context;
use log::info;
use machine_learning::{InputSpec, checkpoint};
use nrekit::{Framework, RunConfig, data::JsonLoader, models::BagSoftmax};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <train|test> <config.json>", args[0]);
        process::exit(1);
    }

    let mode = args[1].as_str();
    let config = RunConfig::from_path(Path::new(&args[2]))
        .with_context(|| format!("cannot read config {}", args[2]))?;

    let loader = JsonLoader::from_config(&config.data, config.train.seed)?;
    let test = loader.test_source(&config.data)?;

    let model = Arc::new(BagSoftmax::new(
        Arc::clone(loader.word_vec()),
        InputSpec {
            max_length: config.data.max_length,
            batch_size: config.data.batch_size,
        },
        loader.rel_tot(),
    ));

    match mode {
        "train" => {
            let train = loader.train_source(&config.data, config.train.seed)?;
            let mut framework = Framework::new(Box::new(test)).with_train_source(Box::new(train));

            let report = framework.train(model, &config.train).await?;
            info!(epochs = report.epochs; "done");
            println!("best metric: {}", report.best_metric);
        }
        "test" => {
            let ckpt = config.test.ckpt.clone().unwrap_or_else(|| {
                checkpoint::checkpoint_path(&config.train.ckpt_dir, &config.train.model_name)
            });

            let mut framework = Framework::new(Box::new(test));
            let metric = framework.test(model, Some(&ckpt), config.test.eval_by_accuracy)?;
            println!("{metric}");
        }
        _ => {
            eprintln!("Unknown mode: {mode}. You must use 'train' or 'test'.");
            process::exit(1);
        }
    }

    Ok(())
}
