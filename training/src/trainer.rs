use std::error::Error;

use candle_nn::{AdamW, Optimizer};
use indicatif::{ProgressBar, ProgressStyle};
use nhits::{Batch, Nhits};

use crate::args::Args;
use crate::loss::LossFn;

pub struct Trainer {
    epochs: usize,
    lr_decay: f64,
    lr_decay_step_size: usize,
    patience: u64,
    model_path: String,
}

impl Trainer {
    pub fn new(args: &Args) -> Self {
        Self {
            epochs: args.epochs,
            lr_decay: args.lr_decay,
            lr_decay_step_size: args.lr_decay_step_size.max(1),
            patience: args.patience,
            model_path: args.model_path.clone(),
        }
    }

    /// Fits the model on the given batches. The model, optimizer and losses
    /// are constructed by the caller; this loop only drives them.
    pub fn fit(
        &self,
        model: &Nhits,
        optimizer: &mut AdamW,
        loss_train: LossFn,
        loss_valid: LossFn,
        train: &[Batch],
        valid: &[Batch],
    ) -> Result<f32, Box<dyn Error>> {
        let mut best_val_loss = f32::MAX;
        let mut epochs_no_improve = 0u64;

        for epoch in 1..=self.epochs {
            let progress_bar = ProgressBar::new(train.len() as u64);
            progress_bar.set_style(
                ProgressStyle::default_bar()
                    .template(
                        " {spinner:.cyan} {pos}/{len} [{wide_bar:.cyan/blue}] {eta_precise} | {msg}",
                    )
                    .unwrap(),
            );

            let mut loss_sum = 0f32;
            let mut batch_count = 0usize;
            for batch in train {
                let prediction = model.forward(batch, true)?;
                let loss = loss_train(
                    &prediction.target,
                    &prediction.forecast,
                    &prediction.mask,
                    &batch.target,
                )?;
                optimizer.backward_step(&loss)?;

                loss_sum += f32::try_from(loss)?;
                batch_count += 1;
                progress_bar.set_message(format!("loss: {:.5}", loss_sum / batch_count as f32));
                progress_bar.inc(1);
            }
            let train_loss = loss_sum / batch_count.max(1) as f32;

            let val_loss = self.validate(model, loss_valid, valid)?;
            progress_bar.set_message(format!("val: {val_loss:.5}, loss: {train_loss:.5}"));
            progress_bar.finish();

            if self.lr_decay < 1.0 && epoch % self.lr_decay_step_size == 0 {
                let new_lr = optimizer.learning_rate() * self.lr_decay;
                optimizer.set_learning_rate(new_lr);
                log::info!("Learning rate decayed to {new_lr:.6}");
            }

            if val_loss < best_val_loss {
                best_val_loss = val_loss;
                epochs_no_improve = 0;
                model.save(&self.model_path)?;
            } else {
                epochs_no_improve += 1;
                if epochs_no_improve >= self.patience {
                    log::info!("Early stopping after {} epochs", epoch);
                    break;
                }
            }
        }

        Ok(best_val_loss)
    }

    fn validate(
        &self,
        model: &Nhits,
        loss_valid: LossFn,
        valid: &[Batch],
    ) -> Result<f32, Box<dyn Error>> {
        let mut total_loss = 0f32;
        let mut batch_count = 0usize;
        for batch in valid {
            let prediction = model.forward(batch, false)?;
            let loss = loss_valid(
                &prediction.target,
                &prediction.forecast,
                &prediction.mask,
                &batch.target,
            )?;
            total_loss += f32::try_from(loss)?;
            batch_count += 1;
        }
        Ok(total_loss / batch_count.max(1) as f32)
    }
}
