use chrono::NaiveDate;
use grib::codetables::grib2::Table4_4;
use grib::{Code, ForecastTime, Grib2SubmessageDecoder};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

use super::{GridDataset, GridDecoder, GridError, GridMessage};

/// GRIB2 decoder backed by the `grib` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GribDecoder;

impl GridDecoder for GribDecoder {
    fn open(&self, path: &Path) -> Result<GridDataset, GridError> {
        let decode_err = |message: String| GridError::Decode {
            path: path.to_path_buf(),
            message,
        };

        let file = File::open(path).map_err(|source| GridError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let grib2 = grib::from_reader(BufReader::new(file)).map_err(|e| decode_err(e.to_string()))?;

        let mut messages = Vec::new();
        for (index, submessage) in grib2.iter() {
            let discipline = submessage.indicator().discipline;
            let prod_def = submessage.prod_def();
            let variable = variable_name(
                discipline,
                prod_def.parameter_category(),
                prod_def.parameter_number(),
            );
            let forecast_hour = prod_def.forecast_time().and_then(lead_hours);

            let (latitudes, longitudes): (Vec<f64>, Vec<f64>) = submessage
                .latlons()
                .map_err(|e| decode_err(format!("message {:?}: {}", index, e)))?
                .map(|(lat, lon)| (f64::from(lat), f64::from(lon)))
                .unzip();

            let decoder = Grib2SubmessageDecoder::from(submessage)
                .map_err(|e| decode_err(format!("message {:?}: {}", index, e)))?;
            let values: Vec<f64> = decoder
                .dispatch()
                .map_err(|e| decode_err(format!("message {:?}: {}", index, e)))?
                .map(f64::from)
                .collect();

            debug!(?index, %variable, ?forecast_hour, points = values.len(), "decoded GRIB2 message");
            messages.push(GridMessage {
                variable,
                forecast_hour,
                latitudes,
                longitudes,
                values,
            });
        }

        if messages.is_empty() {
            return Err(decode_err("file holds no GRIB2 messages".to_string()));
        }

        Ok(GridDataset {
            messages,
            base_time: read_reference_time(path),
        })
    }
}

/// Short name for a GRIB2 parameter.
fn variable_name(discipline: u8, category: Option<u8>, number: Option<u8>) -> String {
    match (discipline, category, number) {
        // Mass mixing ratio of an atmospheric chemical constituent. CO2 is the only
        // constituent ever requested.
        (0, Some(20), Some(2)) => "co2".to_string(),
        (d, c, n) => format!(
            "param_{}_{}_{}",
            d,
            c.map_or_else(|| "x".to_string(), |c| c.to_string()),
            n.map_or_else(|| "x".to_string(), |n| n.to_string())
        ),
    }
}

/// Lead time in whole hours. Steps in calendar units or not falling on an hour
/// are left out.
fn lead_hours(ft: ForecastTime) -> Option<u32> {
    let seconds_per_unit: u64 = match ft.unit {
        Code::Name(Table4_4::Second) => 1,
        Code::Name(Table4_4::Minute) => 60,
        Code::Name(Table4_4::Hour) => 3_600,
        Code::Name(Table4_4::ThreeHours) => 3 * 3_600,
        Code::Name(Table4_4::SixHours) => 6 * 3_600,
        Code::Name(Table4_4::TwelveHours) => 12 * 3_600,
        Code::Name(Table4_4::Day) => 24 * 3_600,
        ref unit => {
            debug!(?unit, value = ft.value, "forecast step unit not convertible to hours");
            return None;
        }
    };
    let seconds = u64::from(ft.value) * seconds_per_unit;
    if seconds % 3_600 != 0 {
        debug!(seconds, "forecast step is not a whole number of hours");
        return None;
    }
    u32::try_from(seconds / 3_600).ok()
}

/// Section 0 (16 bytes) plus the first 19 octets of section 1.
const HEADER_LEN: usize = 35;

fn read_reference_time(path: &Path) -> Option<String> {
    let mut header = [0u8; HEADER_LEN];
    File::open(path).ok()?.read_exact(&mut header).ok()?;
    reference_time(&header)
}

/// Reference time from the identification section of the first message.
fn reference_time(header: &[u8]) -> Option<String> {
    if header.len() < HEADER_LEN || &header[0..4] != b"GRIB" || header[7] != 2 {
        return None;
    }
    let section = &header[16..];
    if section[4] != 1 {
        return None;
    }

    let year = u16::from_be_bytes([section[12], section[13]]);
    NaiveDate::from_ymd_opt(i32::from(year), u32::from(section[14]), u32::from(section[15]))?
        .and_hms_opt(
            u32::from(section[16]),
            u32::from(section[17]),
            u32::from(section[18]),
        )
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
}
