use anyhow::{bail, Error};
use clap::Parser;
use ftail::Ftail;
use log::{info, LevelFilter};

use phylo_bayes::alphabets::dna_alphabet;
use phylo_bayes::handler::ParameterSet;
use phylo_bayes::io::{parse_sample, read_handler_from_file, write_handler_to_file};
use phylo_bayes::likelihood::{SampleCostFunction, Scorer};
use phylo_bayes::optimisers::{FreeEnergyCost, ParameterOptimiser};

mod cli;
use crate::cli::Cli;

type Result<T> = std::result::Result<T, Error>;

fn main() -> Result<()> {
    if let Err(error) = Ftail::new().console(LevelFilter::Info).init() {
        bail!("Unable to set up logging: {:?}", error)
    }
    let cli = match Cli::try_parse() {
        Ok(cli) => {
            info!("Successfully parsed the command line parameters");
            cli
        }
        Err(error) => {
            bail!("Unable to parse command line arguments: \n {}", error)
        }
    };
    let config = cli.model_config();
    info!("Scoring run started.");
    info!("{}", config);

    let mut handler = read_handler_from_file(&cli.model_file)?;
    let alphabet = dna_alphabet();
    let samples = cli
        .samples
        .iter()
        .map(|text| parse_sample(text, &alphabet))
        .collect::<Result<Vec<_>>>()?;

    if let Some(output) = &cli.output_model_file {
        let set = ParameterSet::BranchLengths {
            column: None,
            shared: false,
        };
        let mut cost = FreeEnergyCost::new(&mut handler, &samples, set, config.mean_field)?;
        let result = ParameterOptimiser::new(&mut cost)
            .with_max_iters(cli.max_iters)
            .run()?;
        info!(
            "Optimised branch lengths from {} to {} in {} iteration(s).",
            result.initial_score, result.final_score, result.iterations
        );
        write_handler_to_file(&handler, output)?;
    }

    let mut scorer = Scorer::new(cli.mode.into(), config);
    for sample in &samples {
        let score = scorer.score(&mut handler, &sample.sequence)?;
        println!("{}\t{}", sample.sequence.id(), score);
    }
    println!("total\t{}", scorer.score_all(&mut handler, &samples)?);
    info!(
        "Scored {} sample(s), {} cache hit(s).",
        samples.len(),
        scorer.cache().hits()
    );
    Ok(())
}
