//! Publication of stored rasters as map layers.
use std::path::Path;

use anyhow::{bail, Context, Result};
use reqwest::{blocking::Client, header::CONTENT_TYPE};
use tracing::{debug, info};

use crate::{config::GeoServerConfig, external::Publisher};

/// Registers GeoTIFFs with GeoServer over its REST API: one
/// coverage store per raster, then one coverage in it.
pub struct GeoServerPublisher {
    http: Client,
    config: GeoServerConfig,
}

impl GeoServerPublisher {
    pub fn new(config: GeoServerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building GeoServer client")?;
        Ok(Self { http, config })
    }

    fn post_xml(&self, url: &str, body: String) -> Result<()> {
        debug!(url, "GeoServer request");
        let response = self
            .http
            .post(url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .header(CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .with_context(|| format!("POST {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!("GeoServer returned {} for {}: {}", status, url, body);
        }
        Ok(())
    }
}

impl Publisher for GeoServerPublisher {
    fn publish(&self, flight: &str, artifact_name: &str, label: Option<&str>) -> Result<()> {
        let layer = layer_name(artifact_name, label);
        let store = format!("{}.tif", layer);
        let base = self.config.url_base.trim_end_matches('/');

        self.post_xml(
            base,
            coverage_store_xml(&store, &self.config.workspace, &self.config.file_url_base, artifact_name),
        )?;
        self.post_xml(
            &format!("{}/{}/coverages", base, store),
            coverage_xml(&layer, &self.config.srs),
        )?;
        info!(flight, layer = %layer, "raster published");
        Ok(())
    }
}

/// Offline stand-in: publishes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, flight: &str, artifact_name: &str, label: Option<&str>) -> Result<()> {
        debug!(flight, artifact_name, ?label, "publishing skipped");
        Ok(())
    }
}

fn layer_name(artifact_name: &str, label: Option<&str>) -> String {
    match label {
        Some(l) => l.to_string(),
        None => Path::new(artifact_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(artifact_name)
            .to_string(),
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn coverage_store_xml(name: &str, workspace: &str, file_url_base: &str, artifact_name: &str) -> String {
    format!(
        "<coverageStore><name>{}</name><workspace>{}</workspace><enabled>true</enabled>\
         <type>GeoTIFF</type><url>{}{}</url></coverageStore>",
        escape(name),
        escape(workspace),
        escape(file_url_base),
        escape(artifact_name)
    )
}

fn coverage_xml(name: &str, srs: &str) -> String {
    format!(
        "<coverage><name>{0}</name><title>{0}</title><srs>{1}</srs></coverage>",
        escape(name),
        escape(srs)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_names() {
        assert_eq!(layer_name("FireFlight_20230110_0200.tif", None), "FireFlight_20230110_0200");
        assert_eq!(
            layer_name("FireFlight_20230110_0200_images/000042.tif", Some("20230110_0200_img_000042")),
            "20230110_0200_img_000042"
        );
    }

    #[test]
    fn request_bodies() {
        assert_eq!(
            coverage_store_xml(
                "F_1.tif",
                "hotspots",
                "file:///mnt/mosaics/",
                "F_1.tif"
            ),
            "<coverageStore><name>F_1.tif</name><workspace>hotspots</workspace><enabled>true</enabled>\
             <type>GeoTIFF</type><url>file:///mnt/mosaics/F_1.tif</url></coverageStore>"
        );
        assert_eq!(
            coverage_xml("a&b", "EPSG:28350"),
            "<coverage><name>a&amp;b</name><title>a&amp;b</title><srs>EPSG:28350</srs></coverage>"
        );
    }
}
