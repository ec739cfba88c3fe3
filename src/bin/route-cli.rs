use clap::{Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;

use dual_route::routing::{substitute, Params};

#[derive(Parser)]
#[command(name = "route-cli")]
#[command(about = "Inspect and call the endpoints exposed by a dual-route service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:3000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the metadata tree
    Meta,
    /// List exposed endpoint names with their routes
    List,
    /// Call an exposed endpoint over HTTP by its dotted name
    Call {
        name: String,
        /// Path parameter, `key=value`
        #[arg(short, long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,
        /// Query parameter, `key=value`
        #[arg(short, long = "query", value_parser = parse_pair)]
        query: Vec<(String, String)>,
        /// Request body, sent as-is
        #[arg(short, long)]
        body: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = client.get(format!("{}/", base)).send().await?;
    if !res.status().is_success() {
        eprintln!("Error: metadata request returned status {}", res.status());
        return Ok(());
    }
    let meta: Value = res.json().await?;

    match cli.command {
        Commands::Meta => {
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Commands::List => {
            let mut out = Vec::new();
            collect_leaves(&meta, &mut String::new(), &mut out);
            for (name, verb, template) in out {
                println!("{:<48} {:<7} {}", name, verb, template);
            }
        }
        Commands::Call {
            name,
            params,
            query,
            body,
        } => {
            let Some((verb, template)) = lookup(&meta, &name) else {
                eprintln!("Error: no endpoint named '{}'", name);
                return Ok(());
            };
            let params = params
                .into_iter()
                .fold(Params::new(), |params, (key, value)| params.with(key, value));
            let path = substitute(&template, &params)?;

            let method = Method::from_bytes(verb.as_bytes())?;
            let mut request = client.request(method, format!("{}{}", base, path)).query(&query);
            if let Some(body) = body {
                request = request.body(body);
            }
            print_response(request.send().await?).await?;
        }
    }

    Ok(())
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

/// Metadata leaves are `[verb, template]` arrays.
fn as_leaf(value: &Value) -> Option<(String, String)> {
    match value.as_array()?.as_slice() {
        [Value::String(verb), Value::String(template)] => Some((verb.clone(), template.clone())),
        _ => None,
    }
}

fn lookup(meta: &Value, name: &str) -> Option<(String, String)> {
    let node = name.split('.').try_fold(meta, |node, segment| node.get(segment))?;
    as_leaf(node)
}

fn collect_leaves(node: &Value, prefix: &mut String, out: &mut Vec<(String, String, String)>) {
    if let Some((verb, template)) = as_leaf(node) {
        out.push((prefix.clone(), verb, template));
        return;
    }
    let Some(children) = node.as_object() else {
        return;
    };
    for (name, child) in children {
        let mark = prefix.len();
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(name);
        collect_leaves(child, prefix, out);
        prefix.truncate(mark);
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    println!("{}", status);
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
