use std::time::{Duration, Instant};
use rand::{seq::SliceRandom, thread_rng};
use reqwest::Client;
use hdrhistogram::Histogram;


// usage: xtask [url] [model,model,...]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args().nth(1).unwrap_or_else(|| "http://127.0.0.1:8080/v1/completions".to_string());
    let models: Vec<String> = std::env::args()
        .nth(2)
        .map(|m| m.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    let clients = 8usize; // concurrent
    let total = 200usize; // total requests
    let prompts = vec!["What is an alpaca?", "Write a haiku about rust.", "Explain mutexes.", "Name three rivers.", "Translate 'hello' to French."];

    let client = Client::builder().pool_idle_timeout(Duration::from_secs(10)).build()?;
    let mut hist = Histogram::<u64>::new(3)?;
    let mut errors = 0usize;

    let start = Instant::now();
    let mut tasks = vec![];
    for _ in 0..clients {
        let client = client.clone();
        let url = url.clone();
        let prompts = prompts.clone();
        let models = models.clone();
        tasks.push(tokio::spawn(async move {
            let mut latencies = vec![];
            let mut errs = 0;
            for _ in 0..(total/clients) {
                let body = {
                    let mut rng = thread_rng();
                    let mut body = serde_json::json!({"prompt": prompts.choose(&mut rng).unwrap(), "max_tokens": 64});
                    if let Some(m) = models.choose(&mut rng) {
                        body["model"] = serde_json::Value::from(m.as_str());
                    }
                    body
                };
                let t0 = Instant::now();
                let res = client.post(&url).json(&body).send().await;
                let dur = t0.elapsed();
                match res {
                    Ok(r) if r.status().is_success() => { latencies.push(dur); }
                    _ => errs += 1,
                }
            }
            (latencies, errs)
        }));
    }

    for t in tasks { let (ls, e) = t.await?; for d in ls { hist.record(d.as_millis() as u64).ok(); } errors += e; }

    println!("ran {} reqs in {:?}", total, start.elapsed());
    println!("errors: {}", errors);
    println!("p50: {} ms", hist.value_at_quantile(0.50));
    println!("p95: {} ms", hist.value_at_quantile(0.95));
    println!("p99: {} ms", hist.value_at_quantile(0.99));
    Ok(())
}
