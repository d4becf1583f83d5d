use crate::config::{CacheConfig, DataLayout};
use crate::field::GriddedField;
use crate::registry::CityRegistry;
use crate::writer::SizeReport;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn show_greeting() {
    println!("=== Precipitation Cache Builder ===");
}

pub fn config_echo(config: &CacheConfig, layout: &DataLayout) {
    println!("\nConfiguration:");
    println!("  Data root: {}", layout.root.display());
    println!("  City registry: {}", layout.cities_file.display());
    println!("  NetCDF directory: {}", layout.meteo_dir.display());
    println!("  Output cache: {}", layout.output_file.display());
    println!("  Variables tried: {}", config.variable_candidates.join(", "));
    println!(
        "  Profile: x{} / {:?} / clamp negatives: {}",
        config.profile.scale_factor, config.profile.aggregation, config.profile.clamp_negative
    );
}

pub fn show_registry_summary(registry: &CityRegistry) {
    println!("\nCities: {} loaded", registry.len());
}

pub fn show_field_info(field: &dyn GriddedField, years: &[i32]) {
    println!("\nGridded field:");
    println!("  time: {}", field.timestamps().len());
    println!("  lat: {}", field.latitudes().len());
    println!("  lon: {}", field.longitudes().len());
    if let (Some(first), Some(last)) = (years.first(), years.last()) {
        println!("  Years: {} - {}", first, last);
    }
}

pub fn show_size_report(report: &SizeReport) {
    println!("\nCache written: {:.2} MiB", report.megabytes);
    if report.within_budget {
        println!("  Within the {:.0} MiB budget", report.budget_mb);
    } else {
        println!("  Above the {:.0} MiB budget", report.budget_mb);
    }
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    println!("\n=== Cache generation finished in {:.1}s ===", elapsed.as_secs_f64());
}

/// Progress bar over the yearly loop. Hidden instances draw nothing.
pub struct YearProgress {
    bar: Option<ProgressBar>,
}

impl YearProgress {
    pub fn new(years: usize) -> Self {
        let bar = ProgressBar::new(years as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    pub fn hidden() -> Self {
        Self { bar: None }
    }

    pub fn start_year(&self, year: i32) {
        if let Some(ref bar) = self.bar {
            bar.set_message(year.to_string());
        }
    }

    pub fn finish_year(&self) {
        if let Some(ref bar) = self.bar {
            bar.inc(1);
        }
    }

    /// Runs `f` with the bar cleared, so log lines do not tear it.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        match &self.bar {
            Some(bar) => bar.suspend(f),
            None => f(),
        }
    }

    pub fn finish(&self, succeeded: usize, total: usize) {
        if let Some(ref bar) = self.bar {
            bar.finish_with_message(format!("{succeeded}/{total} years"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suspend_runs_closure() {
        assert_eq!(YearProgress::hidden().suspend(|| 7), 7);

        let progress = YearProgress::new(3);
        progress.start_year(2001);
        assert_eq!(progress.suspend(|| "logged"), "logged");
        progress.finish_year();
        progress.finish(1, 3);
    }
}
