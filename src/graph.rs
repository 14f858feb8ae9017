use crate::app::SharedState;
use crate::error::AppError;
use crate::production::{self, DailyEfficiency, MonthlyProduction};
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use image::{ImageOutputFormat, RgbImage};
use plotters::prelude::*;
use std::io::Cursor;
use thiserror::Error;

const TEAL: RGBColor = RGBColor(13, 148, 136);

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("failed to draw chart: {0}")]
    Drawing(String),

    #[error("failed to encode chart: {0}")]
    Encode(#[from] image::ImageError),
}

impl From<ChartError> for AppError {
    fn from(e: ChartError) -> Self {
        AppError::Internal(e.to_string())
    }
}

fn drawing<E: std::fmt::Display>(e: E) -> ChartError {
    ChartError::Drawing(e.to_string())
}

/// Configuration options for chart rendering
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: "Chart".to_string(),
            y_label: String::new(),
            width: 800,
            height: 400,
        }
    }
}

/// Renders the monthly production bars with the target line
///
/// One bar per month, labelled with the month name, and a line across
/// all bars at the monthly target.
///
/// # Arguments
/// * `months` - Monthly averages in chronological order
/// * `options` - Chart size and labels
///
/// # Returns
/// * A Result containing the PNG image data as bytes or an error
pub fn monthly_production_chart(
    months: &[MonthlyProduction],
    options: &ChartOptions,
) -> Result<Vec<u8>, ChartError> {
    let mut pixels = vec![0u8; (options.width * options.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(drawing)?;

        let peak = months
            .iter()
            .map(|m| m.production.max(m.target))
            .fold(0.0, f64::max);
        let y_max = (peak * 1.15).max(1.0);
        let n = months.len().max(1) as f64;

        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 24).into_font())
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(0.0..n, 0.0..y_max)
            .map_err(drawing)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(months.len().max(1))
            .x_label_formatter(&|x| {
                months
                    .get(x.floor() as usize)
                    .map(|m| m.month.clone())
                    .unwrap_or_default()
            })
            .y_desc(&options.y_label)
            .draw()
            .map_err(drawing)?;

        chart
            .draw_series(months.iter().enumerate().map(|(i, m)| {
                let x = i as f64;
                Rectangle::new([(x + 0.15, 0.0), (x + 0.85, m.production)], TEAL.filled())
            }))
            .map_err(drawing)?
            .label("Production")
            .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], TEAL.filled()));

        chart
            .draw_series(LineSeries::new(
                months
                    .iter()
                    .enumerate()
                    .flat_map(|(i, m)| [(i as f64, m.target), (i as f64 + 1.0, m.target)]),
                RED.stroke_width(2),
            ))
            .map_err(drawing)?
            .label("Target")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], RED));

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(drawing)?;

        root.present().map_err(drawing)?;
    }
    encode_png(pixels, options)
}

/// Renders the daily efficiency trend as a line with point markers
///
/// # Arguments
/// * `days` - Efficiency readings in chronological order
/// * `options` - Chart size and labels
///
/// # Returns
/// * A Result containing the PNG image data as bytes or an error
pub fn efficiency_trend_chart(
    days: &[DailyEfficiency],
    options: &ChartOptions,
) -> Result<Vec<u8>, ChartError> {
    let mut pixels = vec![0u8; (options.width * options.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(drawing)?;

        let low = days.iter().map(|d| d.efficiency).fold(100.0, f64::min);
        let y_min = (low - 5.0).clamp(0.0, 95.0);
        let x_max = days.len().saturating_sub(1).max(1) as f64;

        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 24).into_font())
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(-0.25..x_max + 0.25, y_min..100.0)
            .map_err(drawing)?;

        chart
            .configure_mesh()
            .x_labels(days.len().max(1))
            .x_label_formatter(&|x| {
                let i = x.round();
                if (x - i).abs() > 0.01 || i < 0.0 {
                    return String::new();
                }
                days.get(i as usize).map(|d| d.day.clone()).unwrap_or_default()
            })
            .y_desc(&options.y_label)
            .draw()
            .map_err(drawing)?;

        let points: Vec<(f64, f64)> = days
            .iter()
            .enumerate()
            .map(|(i, d)| (i as f64, d.efficiency))
            .collect();

        chart
            .draw_series(LineSeries::new(points.iter().copied(), TEAL.stroke_width(2)))
            .map_err(drawing)?;
        chart
            .draw_series(points.iter().map(|&p| Circle::new(p, 4, TEAL.filled())))
            .map_err(drawing)?;

        root.present().map_err(drawing)?;
    }
    encode_png(pixels, options)
}

fn encode_png(pixels: Vec<u8>, options: &ChartOptions) -> Result<Vec<u8>, ChartError> {
    let image = RgbImage::from_raw(options.width, options.height, pixels)
        .ok_or_else(|| ChartError::Drawing("pixel buffer has the wrong size".to_string()))?;

    let mut png = Cursor::new(Vec::new());
    image.write_to(&mut png, ImageOutputFormat::Png)?;
    Ok(png.into_inner())
}

fn png_response(png: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        png,
    )
        .into_response()
}

pub async fn handle_monthly_chart(State(state): State<SharedState>) -> Result<Response, AppError> {
    let records = production::list_recent(&state.db, state.config.production_limit)?;
    let overview = production::overview(&records);

    let options = ChartOptions {
        title: "Monthly Production vs Target".to_string(),
        y_label: "Tons".to_string(),
        ..ChartOptions::default()
    };
    let png = tokio::task::spawn_blocking(move || monthly_production_chart(&overview.monthly, &options))
        .await
        .map_err(|e| AppError::Internal(format!("chart task failed: {}", e)))??;
    Ok(png_response(png))
}

pub async fn handle_efficiency_chart(
    State(state): State<SharedState>,
) -> Result<Response, AppError> {
    let records = production::list_recent(&state.db, state.config.production_limit)?;
    let overview = production::overview(&records);

    let options = ChartOptions {
        title: "Daily Efficiency Trend".to_string(),
        y_label: "Efficiency (%)".to_string(),
        ..ChartOptions::default()
    };
    let png =
        tokio::task::spawn_blocking(move || efficiency_trend_chart(&overview.daily_trend, &options))
            .await
            .map_err(|e| AppError::Internal(format!("chart task failed: {}", e)))??;
    Ok(png_response(png))
}
