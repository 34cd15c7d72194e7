/*!
 * Subcommand implementations, one per route on the Tango REST surface plus
 * the composite `run-job` convenience command.
 */

use crate::client::{AddJobRequest, FileSpec, PreallocRequest, TangoClient};
use crate::error::{CliError, Result};
use clap::{Args, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use console::style;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create (or reuse) a lab working directory on the server
    Open(OpenArgs),
    /// Upload a single file into a lab working directory
    Upload(UploadArgs),
    /// Submit a job against an uploaded lab
    AddJob(AddJobArgs),
    /// Poll a lab for an output file, printing its bytes once ready
    Poll(PollArgs),
    /// Fetch the partial output of a still-running job
    GetPartialOutput(GetPartialOutputArgs),
    /// Print queue depth and pool summary
    Info,
    /// List live or dead jobs
    Jobs(JobsArgs),
    /// Print preallocation pool stats for an image
    Pool(PoolArgs),
    /// Resize the preallocation pool for an image
    Prealloc(PreallocArgs),
    /// Submit a new VM image definition for the (external) build pipeline
    Build(BuildArgs),
    /// Open a lab, upload every file in a directory, then submit one or more jobs
    RunJob(RunJobArgs),
}

#[derive(Debug, Args)]
pub struct OpenArgs {
    pub courselab: String,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    pub courselab: String,
    pub filename: PathBuf,
}

#[derive(Debug, Args)]
pub struct AddJobArgs {
    pub courselab: String,
    #[arg(long)]
    pub image: String,
    /// JSON list of {"localFile": ..., "destFile": ...} pairs, as produced by `--infiles`
    #[arg(long)]
    pub infiles: String,
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,
    #[arg(long, default_value_t = 0)]
    pub maxsize: u64,
    #[arg(long, default_value = "result.out")]
    pub output_file: String,
    #[arg(long, default_value = "test_job")]
    pub jobname: String,
    #[arg(long)]
    pub access_key_id: Option<String>,
    #[arg(long)]
    pub access_key: Option<String>,
    #[arg(long, default_value_t = false)]
    pub disable_network: bool,
    #[arg(long)]
    pub instance_type: Option<String>,
    #[arg(long, default_value_t = false)]
    pub ec2_vmms: bool,
    #[arg(long)]
    pub stop_before: Option<String>,
    #[arg(long)]
    pub notify_url: Option<String>,
    #[arg(long)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct PollArgs {
    pub courselab: String,
    #[arg(long, default_value = "result.out")]
    pub output_file: String,
}

#[derive(Debug, Args)]
pub struct GetPartialOutputArgs {
    pub jobid: i64,
}

#[derive(Debug, Args)]
pub struct JobsArgs {
    #[arg(long, default_value_t = 0)]
    pub dead_jobs: u8,
}

#[derive(Debug, Args)]
pub struct PoolArgs {
    pub image: String,
}

#[derive(Debug, Args)]
pub struct PreallocArgs {
    pub image: String,
    #[arg(long, default_value_t = 2)]
    pub num: usize,
    #[arg(long, default_value = "localDocker")]
    pub vmms: String,
    #[arg(long, default_value_t = 1)]
    pub cores: u32,
    #[arg(long, default_value_t = 512)]
    pub memory: u32,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    pub image_file: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunJobArgs {
    pub directory: PathBuf,
    #[arg(long, default_value_t = 1)]
    pub num_jobs: u32,
    #[arg(long, default_value = "localDocker")]
    pub vmms: String,
    #[arg(long)]
    pub image: String,
    #[arg(long, default_value = "test_job")]
    pub jobname: String,
    #[arg(long, default_value = "result.out")]
    pub output_file: String,
}

/// Maps a bare filename to the `{localFile, destFile}` pair the server
/// expects, special-casing the two names the autograder treats specially.
fn file_to_spec(name: &str) -> FileSpec {
    let dest = match name {
        "Makefile" => "Makefile".to_string(),
        "handin.tgz" => "handin.tgz".to_string(),
        other => other.to_string(),
    };
    FileSpec { local_file: name.to_string(), dest_file: dest }
}

pub fn run(client: &TangoClient, cmd: Command) -> Result<()> {
    match cmd {
        Command::Open(args) => {
            let body = client.open(&args.courselab)?;
            println!("{body}");
        }
        Command::Upload(args) => {
            let filename = args
                .filename
                .file_name()
                .and_then(|f| f.to_str())
                .ok_or_else(|| CliError::InvalidArgument("filename has no base name".into()))?
                .to_string();
            let bytes = fs::read(&args.filename)?;
            let body = client.upload(&args.courselab, &filename, bytes)?;
            println!("{body}");
        }
        Command::AddJob(args) => {
            let resp = client.add_job(&args.courselab, &build_add_job_request(&args)?)?;
            println!("job id: {}", resp.job_id);
        }
        Command::Poll(args) => match client.poll(&args.courselab, &args.output_file)? {
            Some(bytes) => {
                use std::io::Write;
                std::io::stdout().write_all(&bytes)?;
            }
            None => println!("not ready"),
        },
        Command::GetPartialOutput(args) => {
            println!("{}", client.get_partial_output(args.jobid)?);
        }
        Command::Info => {
            let info = client.info()?;
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec!["field", "value"]);
            table
                .add_row(vec!["live jobs".to_string(), info.live_jobs.to_string()])
                .add_row(vec!["dead jobs".to_string(), info.dead_jobs.to_string()])
                .add_row(vec!["images".to_string(), info.images.join(", ")])
                .add_row(vec!["max concurrent jobs".to_string(), info.max_concurrent_jobs.to_string()])
                .add_row(vec!["reuse vms".to_string(), info.reuse_vms.to_string()]);
            println!("{table}");
        }
        Command::Jobs(args) => {
            let jobs = client.jobs(args.dead_jobs != 0)?;
            let label = if args.dead_jobs != 0 { "dead" } else { "live" };
            println!("{} {} jobs:", style(label).bold(), label);
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        Command::Pool(args) => {
            let stats = client.pool(&args.image)?;
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec!["image", "total", "free"]);
            table.add_row(vec![args.image, stats.total.to_string(), stats.free.to_string()]);
            println!("{table}");
        }
        Command::Prealloc(args) => {
            let req = PreallocRequest { vmms: args.vmms, cores: Some(args.cores), memory: Some(args.memory) };
            let body = client.prealloc(&args.image, args.num, &req)?;
            println!("{body}");
        }
        Command::Build(args) => {
            let proceed = dialoguer::Confirm::new()
                .with_prompt(format!("submit {} to the image build pipeline?", args.image_file.display()))
                .default(true)
                .interact()
                .unwrap_or(true);
            if !proceed {
                println!("aborted");
                return Ok(());
            }
            let bytes = fs::read(&args.image_file)?;
            let body = client.build(bytes)?;
            println!("{body}");
        }
        Command::RunJob(args) => run_job(client, &args)?,
    }
    Ok(())
}

fn build_add_job_request(args: &AddJobArgs) -> Result<AddJobRequest> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(&args.infiles)
        .map_err(|e| CliError::InputFiles(e.to_string()))?;
    let mut files = Vec::with_capacity(raw.len());
    for entry in raw {
        if let Some(name) = entry.as_str() {
            files.push(file_to_spec(name));
        } else {
            let local_file = entry
                .get("localFile")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CliError::InputFiles("entry missing localFile".into()))?
                .to_string();
            let dest_file = entry
                .get("destFile")
                .and_then(|v| v.as_str())
                .unwrap_or(&local_file)
                .to_string();
            files.push(FileSpec { local_file, dest_file });
        }
    }

    Ok(AddJobRequest {
        image: args.image.clone(),
        files,
        timeout: args.timeout,
        max_kb: args.maxsize,
        output_file: args.output_file.clone(),
        job_name: args.jobname.clone(),
        access_key_id: args.access_key_id.clone(),
        access_key: args.access_key.clone(),
        disable_network: args.disable_network,
        instance_type: args.instance_type.clone(),
        ec2_vmms: args.ec2_vmms,
        stop_before: args.stop_before.clone(),
        notify_url: args.notify_url.clone(),
        callback_url: args.callback_url.clone(),
    })
}

fn run_job(client: &TangoClient, args: &RunJobArgs) -> Result<()> {
    let lab = args
        .directory
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| CliError::InvalidArgument("directory has no base name".into()))?
        .to_string();

    client.open(&lab)?;

    let mut files = Vec::new();
    for entry in fs::read_dir(&args.directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        client.upload(&lab, &name, fs::read(entry.path())?)?;
        files.push(file_to_spec(&name));
    }

    for i in 0..args.num_jobs {
        let job_name = if args.num_jobs > 1 { format!("{}_{}", args.jobname, i) } else { args.jobname.clone() };
        let output_file = if args.num_jobs > 1 { format!("{}.{}", args.output_file, i) } else { args.output_file.clone() };
        let req = AddJobRequest {
            image: args.image.clone(),
            files: files.clone(),
            timeout: 0,
            max_kb: 0,
            output_file,
            job_name,
            ec2_vmms: args.vmms == "ec2",
            ..Default::default()
        };
        let resp = client.add_job(&lab, &req)?;
        println!("submitted job {} as job id {}", i, resp.job_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_plain_filenames_to_identity_specs() {
        let spec = file_to_spec("autograde.py");
        assert_eq!(spec.local_file, "autograde.py");
        assert_eq!(spec.dest_file, "autograde.py");
    }

    #[test]
    fn parses_bare_string_infiles() {
        let args = AddJobArgs {
            courselab: "lab1".into(),
            image: "img".into(),
            infiles: r#"["Makefile", "handin.tgz"]"#.into(),
            timeout: 0,
            maxsize: 0,
            output_file: "result.out".into(),
            jobname: "test_job".into(),
            access_key_id: None,
            access_key: None,
            disable_network: false,
            instance_type: None,
            ec2_vmms: false,
            stop_before: None,
            notify_url: None,
            callback_url: None,
        };
        let req = build_add_job_request(&args).unwrap();
        assert_eq!(req.files.len(), 2);
        assert_eq!(req.files[0].local_file, "Makefile");
    }

    #[test]
    fn parses_object_infiles() {
        let args = AddJobArgs {
            courselab: "lab1".into(),
            image: "img".into(),
            infiles: r#"[{"localFile": "a.c", "destFile": "b.c"}]"#.into(),
            timeout: 0,
            maxsize: 0,
            output_file: "result.out".into(),
            jobname: "test_job".into(),
            access_key_id: None,
            access_key: None,
            disable_network: false,
            instance_type: None,
            ec2_vmms: false,
            stop_before: None,
            notify_url: None,
            callback_url: None,
        };
        let req = build_add_job_request(&args).unwrap();
        assert_eq!(req.files[0].local_file, "a.c");
        assert_eq!(req.files[0].dest_file, "b.c");
    }

    #[test]
    fn rejects_malformed_infiles() {
        let args = AddJobArgs {
            courselab: "lab1".into(),
            image: "img".into(),
            infiles: "not json".into(),
            timeout: 0,
            maxsize: 0,
            output_file: "result.out".into(),
            jobname: "test_job".into(),
            access_key_id: None,
            access_key: None,
            disable_network: false,
            instance_type: None,
            ec2_vmms: false,
            stop_before: None,
            notify_url: None,
            callback_url: None,
        };
        assert!(build_add_job_request(&args).is_err());
    }
}

