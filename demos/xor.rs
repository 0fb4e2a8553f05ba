//! Trains a 2 → 8 → 1 network on XOR.
//!
//! Run with `RUST_LOG=briny_nn=debug` to see layer construction events.

use briny_nn::activations::Activation;
use briny_nn::layers::Dense;
use briny_nn::loss::mse;
use briny_nn::model::Sequential;
use briny_nn::optim::Sgd;
use briny_nn::{Result, tensor};
use rand::seq::SliceRandom;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let inputs = [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
    let targets = [0.0, 1.0, 1.0, 0.0];

    let mut model = Sequential::new()
        .with(Dense::new(8).activation(Activation::Tanh).seed(1))
        .with(Dense::new(1).activation(Activation::Sigmoid).seed(2));
    model.compile(&[2])?;
    model.set_training(true);
    print!("{}", model.summary()?);

    let sgd = Sgd::new(0.5)?;
    let epochs = 2000;
    let mut rng = rand::rng();
    let mut order = [0, 1, 2, 3];

    for epoch in 0..epochs {
        order.shuffle(&mut rng);
        let mut loss_accum = 0.0;
        for &i in &order {
            let x = tensor!([inputs[i][0], inputs[i][1]]);
            let y = tensor!([targets[i]]);

            model.zero_gradients()?;
            let prediction = model.forward(&x)?.clone();
            let (loss, grad) = mse(&prediction, &y)?;
            model.backward(&grad)?;
            sgd.step(&mut model)?;
            loss_accum += loss;
        }
        if epoch % 200 == 0 || epoch == epochs - 1 {
            tracing::info!(epoch, loss = loss_accum / 4.0, "training");
        }
    }

    model.set_training(false);
    for (input, target) in inputs.iter().zip(targets) {
        let y = model.forward(&tensor!([input[0], input[1]]))?.item()?;
        println!("{input:?} -> {y:.3} (target {target})");
    }
    Ok(())
}
