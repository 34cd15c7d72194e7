/*!
 * Thin REST client for the Tango job server.
 *
 * Each method corresponds to one route in `tango-web`'s router and mirrors
 * the request/response shapes of the original Python `tango-cli.py` client.
 */

use crate::error::{CliError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct FileSpec {
    #[serde(rename = "localFile")]
    pub local_file: String,
    #[serde(rename = "destFile")]
    pub dest_file: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AddJobRequest {
    pub image: String,
    pub files: Vec<FileSpec>,
    pub timeout: u64,
    pub max_kb: u64,
    pub output_file: String,
    #[serde(rename = "jobName")]
    pub job_name: String,
    #[serde(rename = "accessKeyId", skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(rename = "accessKey", skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    pub disable_network: bool,
    #[serde(rename = "instanceType", skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(rename = "ec2Vmms")]
    pub ec2_vmms: bool,
    #[serde(rename = "stopBefore", skip_serializing_if = "Option::is_none")]
    pub stop_before: Option<String>,
    #[serde(rename = "notifyURL", skip_serializing_if = "Option::is_none")]
    pub notify_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddJobResponse {
    pub job_id: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PreallocRequest {
    pub vmms: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct InfoResponse {
    pub live_jobs: usize,
    pub dead_jobs: usize,
    pub images: Vec<String>,
    pub max_concurrent_jobs: usize,
    pub reuse_vms: bool,
}

#[derive(Debug, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub free: usize,
}

pub struct TangoClient {
    http: reqwest::blocking::Client,
    base_url: String,
    key: String,
}

impl TangoClient {
    pub fn new(server: &str, port: u16, ssl: bool, key: &str) -> Self {
        let scheme = if ssl { "https" } else { "http" };
        Self {
            http: reqwest::blocking::Client::new(),
            base_url: format!("{scheme}://{server}:{port}"),
            key: key.to_string(),
        }
    }

    /// Preliminary reachability check, mirrored from the original client's
    /// GET to the bare server root before routing a command.
    pub fn ping(&self) -> Result<()> {
        let resp = self.http.get(&self.base_url).send()?;
        if resp.status().is_success() || resp.status().is_client_error() {
            Ok(())
        } else {
            Err(CliError::Server { status: resp.status().as_u16(), body: resp.text().unwrap_or_default() })
        }
    }

    fn check(&self, resp: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            Err(CliError::Server { status, body })
        }
    }

    pub fn open(&self, lab: &str) -> Result<String> {
        let url = format!("{}/open/{}/{}/", self.base_url, self.key, lab);
        let resp = self.check(self.http.get(&url).send()?)?;
        Ok(resp.text()?)
    }

    pub fn upload(&self, lab: &str, filename: &str, body: Vec<u8>) -> Result<String> {
        let url = format!("{}/upload/{}/{}/", self.base_url, self.key, lab);
        let resp = self.check(
            self.http
                .post(&url)
                .header("Filename", filename)
                .body(body)
                .send()?,
        )?;
        Ok(resp.text()?)
    }

    pub fn add_job(&self, lab: &str, req: &AddJobRequest) -> Result<AddJobResponse> {
        let url = format!("{}/addJob/{}/{}/", self.base_url, self.key, lab);
        let resp = self.check(self.http.post(&url).json(req).send()?)?;
        Ok(resp.json()?)
    }

    pub fn poll(&self, lab: &str, output: &str) -> Result<Option<Vec<u8>>> {
        let url = format!("{}/poll/{}/{}/{}", self.base_url, self.key, lab, output);
        let resp = self.http.get(&url).send()?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = self.check(resp)?;
        Ok(Some(resp.bytes()?.to_vec()))
    }

    pub fn get_partial_output(&self, job_id: i64) -> Result<String> {
        let url = format!("{}/getPartialOutput/{}/{}/", self.base_url, self.key, job_id);
        let resp = self.check(self.http.get(&url).send()?)?;
        Ok(resp.text()?)
    }

    pub fn info(&self) -> Result<InfoResponse> {
        let url = format!("{}/info/{}/", self.base_url, self.key);
        let resp = self.check(self.http.get(&url).send()?)?;
        Ok(resp.json()?)
    }

    pub fn jobs(&self, dead_jobs: bool) -> Result<serde_json::Value> {
        let url = format!("{}/jobs/{}/{}/", self.base_url, self.key, dead_jobs as u8);
        let resp = self.check(self.http.get(&url).send()?)?;
        Ok(resp.json()?)
    }

    pub fn pool(&self, image: &str) -> Result<PoolStats> {
        let url = format!("{}/pool/{}/{}/", self.base_url, self.key, image);
        let resp = self.check(self.http.get(&url).send()?)?;
        Ok(resp.json()?)
    }

    pub fn prealloc(&self, image: &str, num: usize, req: &PreallocRequest) -> Result<String> {
        let url = format!("{}/prealloc/{}/{}/{}/", self.base_url, self.key, image, num);
        let resp = self.check(self.http.post(&url).json(req).send()?)?;
        Ok(resp.text()?)
    }

    pub fn build(&self, body: Vec<u8>) -> Result<String> {
        let url = format!("{}/build/{}/", self.base_url, self.key);
        let resp = self.check(self.http.post(&url).body(body).send()?)?;
        Ok(resp.text()?)
    }
}
