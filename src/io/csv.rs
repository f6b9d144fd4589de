/*!
# Saving traces to CSV

One row per trace. The columns are:
- `trace`, the index of the trace in the empirical,
- `log_weight`, `log_prob`, `log_prob_observed` and `result`,
- one column per named variable, then one per controlled address.

The named and address columns are the union over all traces, in sorted order. A trace that
lacks a variable leaves its cell empty.
*/

use csv::Writer;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::empirical::Empirical;
use crate::error::Result;
use crate::trace::Trace;

/// `path` with `.csv` appended, unless it already ends in it.
pub fn csv_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|e| e == "csv") {
        return path.to_path_buf();
    }
    let mut s = path.as_os_str().to_owned();
    s.push(".csv");
    PathBuf::from(s)
}

/**
Writes every trace of `empirical` to `filename`.

# Examples

```rust
use mini_ppl::gum_marsaglia::GaussianUnknownMean;
use mini_ppl::io::csv::save_traces;
use mini_ppl::model::Model;
use mini_ppl::trace::ObserveMap;

let model = GaussianUnknownMean::default();
let prior = model.prior_traces(3, &ObserveMap::new(), 42)?;
save_traces(&prior, std::path::Path::new("/tmp/prior.csv"))?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_traces(empirical: &Empirical<Trace>, filename: &Path) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(filename)?);

    let names: BTreeSet<&str> = empirical
        .values()
        .iter()
        .flat_map(|t| t.variables.iter().filter_map(|v| v.name.as_deref()))
        .collect();
    let addresses: BTreeSet<&str> = empirical
        .values()
        .iter()
        .flat_map(|t| t.controlled().map(|v| v.address.as_str()))
        .collect();

    let mut header: Vec<String> = [
        "trace",
        "log_weight",
        "log_prob",
        "log_prob_observed",
        "result",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(names.iter().map(|s| s.to_string()));
    header.extend(addresses.iter().map(|s| s.to_string()));
    wtr.write_record(&header)?;

    for (i, (trace, log_weight)) in empirical
        .values()
        .iter()
        .zip(empirical.log_weights())
        .enumerate()
    {
        let mut row = vec![
            i.to_string(),
            log_weight.to_string(),
            trace.log_prob.to_string(),
            trace.log_prob_observed.to_string(),
            trace.result.to_string(),
        ];
        row.extend(
            names
                .iter()
                .map(|name| trace.value(name).map(|x| x.to_string()).unwrap_or_default()),
        );
        row.extend(addresses.iter().map(|address| {
            trace
                .at_address(address)
                .map(|v| v.value.to_string())
                .unwrap_or_default()
        }));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}
