// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Per-net event timelines and the VCD loader that fills them.
//!
//! Only the nets an analysis asks for (clock, inputs, outputs) are bound;
//! everything else in the VCD value stream is skipped while streaming
//! through [`vcd_ng::FastFlow`].

use compact_str::CompactString;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;
use vcd_ng::{Scope, ScopeItem, Var};

use crate::error::TraceError;
use crate::logic::LogicValue;

/// Simulation time in VCD ticks.
pub type Time = u64;

/// Ordered `(time, value)` events of one net.
///
/// Times are non-decreasing. Several events may share a timestamp (zero-delay
/// glitches); lookups pick the last one before an edge and the first one at
/// or after it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTimeline {
    times: Vec<Time>,
    values: Vec<LogicValue>,
}

impl EventTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a timeline from events, checking that time never goes backwards.
    pub fn from_events<I>(events: I) -> Result<Self, TraceError>
    where
        I: IntoIterator<Item = (Time, LogicValue)>,
    {
        let mut tl = EventTimeline::new();
        for (t, v) in events {
            tl.push(t, v)?;
        }
        Ok(tl)
    }

    /// Append an event.
    pub fn push(&mut self, time: Time, value: LogicValue) -> Result<(), TraceError> {
        if let Some(&last) = self.times.last() {
            if time < last {
                return Err(TraceError::MalformedTrace(format!(
                    "event @{} precedes previous event @{}",
                    time, last
                )));
            }
        }
        self.times.push(time);
        self.values.push(value);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    #[inline]
    pub fn times(&self) -> &[Time] {
        &self.times
    }

    #[inline]
    pub fn values(&self) -> &[LogicValue] {
        &self.values
    }

    /// Event `i` as `(time, value)`.
    #[inline]
    pub fn event(&self, i: usize) -> (Time, LogicValue) {
        (self.times[i], self.values[i])
    }

    pub fn events(&self) -> impl Iterator<Item = (Time, LogicValue)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    /// Index of the last event strictly before `t`.
    #[inline]
    pub fn last_before(&self, t: Time) -> Option<usize> {
        self.times.partition_point(|&x| x < t).checked_sub(1)
    }

    /// Index of the first event at or after `t`.
    #[inline]
    pub fn first_at_or_after(&self, t: Time) -> Option<usize> {
        let i = self.times.partition_point(|&x| x < t);
        (i < self.times.len()).then_some(i)
    }
}

/// The set of timelines of one analysis run, keyed by net name in the order
/// the nets were requested.
#[derive(Debug, Clone)]
pub struct Waveform {
    nets: IndexMap<CompactString, EventTimeline>,
    /// Picoseconds represented by one VCD tick.
    pub ps_per_tick: f64,
}

impl Default for Waveform {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Waveform {
    pub fn new(ps_per_tick: f64) -> Self {
        Waveform {
            nets: IndexMap::new(),
            ps_per_tick,
        }
    }

    pub fn insert(&mut self, name: impl Into<CompactString>, timeline: EventTimeline) {
        self.nets.insert(name.into(), timeline);
    }

    /// Timeline of `name`, or [`TraceError::UnknownSignal`].
    pub fn get(&self, name: &str) -> Result<&EventTimeline, TraceError> {
        self.nets
            .get(name)
            .ok_or_else(|| TraceError::UnknownSignal(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nets.contains_key(name)
    }

    pub fn net_names(&self) -> impl Iterator<Item = &str> {
        self.nets.keys().map(|k| k.as_str())
    }

    pub fn num_events(&self) -> usize {
        self.nets.values().map(|t| t.len()).sum()
    }
}

// ── Net name and scope matching ─────────────────────────────────────────────

/// Split `"bus[3]"` into `("bus", Some(3))`; plain names have no bit.
pub fn split_bit_select(name: &str) -> (&str, Option<i64>) {
    if let Some(stripped) = name.strip_suffix(']') {
        if let Some(open) = stripped.rfind('[') {
            if let Ok(bit) = stripped[open + 1..].trim().parse::<i64>() {
                return (&stripped[..open], Some(bit));
            }
        }
    }
    (name, None)
}

/// Try to match one component in a scope path.
/// Returns the remaining scope on success, or None on failure.
pub fn match_scope_path<'i>(mut scope: &'i str, cur: &str) -> Option<&'i str> {
    if scope.is_empty() {
        return Some("");
    }
    if let Some(s) = scope.strip_prefix('/') {
        scope = s;
    }
    if scope.is_empty() {
        Some("")
    } else if scope.starts_with(cur) {
        if scope.len() == cur.len() {
            Some("")
        } else if scope.as_bytes()[cur.len()] == b'/' {
            Some(&scope[cur.len() + 1..])
        } else {
            None
        }
    } else {
        None
    }
}

/// Find a scope by its `/`-separated path in the VCD hierarchy.
pub fn find_scope<'i>(items: &'i [ScopeItem], path: &str) -> Option<&'i Scope> {
    for item in items {
        if let ScopeItem::Scope(scope) = item {
            if let Some(rest) = match_scope_path(path, scope.identifier.as_str()) {
                return match rest {
                    "" => Some(scope),
                    _ => find_scope(&scope.children[..], rest),
                };
            }
        }
    }
    None
}

/// Depth-first list of variables below `items`.
fn collect_vars<'a>(items: &'a [ScopeItem], recurse: bool, out: &mut Vec<&'a Var>) {
    for item in items {
        match item {
            ScopeItem::Var(var) => out.push(var),
            ScopeItem::Scope(scope) if recurse => collect_vars(&scope.children[..], true, out),
            _ => {}
        }
    }
}

/// Bit position of `bit` within `var`'s value string, if `var` carries it.
fn bit_position(var: &Var, bit: Option<i64>) -> Option<usize> {
    use vcd_ng::ReferenceIndex::*;
    match (bit, &var.index) {
        (None, None) if var.size == 1 => Some(0),
        (None, Some(BitSelect(_))) => Some(0),
        (Some(b), Some(BitSelect(i))) if *i as i64 == b => Some(0),
        (Some(b), Some(Range(msb, lsb))) => {
            let (msb, lsb) = (*msb as i64, *lsb as i64);
            let (lo, hi) = if msb >= lsb { (lsb, msb) } else { (msb, lsb) };
            (lo..=hi).contains(&b).then(|| (b - msb).unsigned_abs() as usize)
        }
        // Vectors without an explicit range are dumped MSB first.
        (Some(b), None) if var.size > 1 && b >= 0 && (b as u64) < var.size as u64 => {
            Some(var.size as usize - 1 - b as usize)
        }
        _ => None,
    }
}

/// Picoseconds per VCD tick for a header timescale. 1 ps is assumed
/// when the VCD does not declare one.
pub fn ps_per_tick(timescale: Option<(u32, vcd_ng::TimescaleUnit)>) -> f64 {
    match timescale {
        Some((ratio, unit)) => {
            let ps_divisor = vcd_ng::TimescaleUnit::PS.divisor() as f64;
            let unit_divisor = unit.divisor() as f64;
            (ratio as f64) * (ps_divisor / unit_divisor)
        }
        None => 1.0,
    }
}

// ── VCD loading ─────────────────────────────────────────────────────────────

/// A VCD file whose header is parsed and whose requested nets are bound to
/// value-change codes. The value stream has not been read yet.
pub struct VcdChanges {
    path: String,
    file: File,
    /// (vcd id code, bit position) -> indices of requested nets
    bindings: HashMap<(u64, usize), Vec<usize>>,
    nets: Vec<CompactString>,
    /// Picoseconds represented by one VCD tick.
    pub ps_per_tick: f64,
}

impl VcdChanges {
    /// Parse the header of `path` and bind `nets`.
    ///
    /// With `scope` set, nets are matched only among the variables declared
    /// directly in that scope (`tb/dut` style path). Without it the whole
    /// hierarchy is searched and the first declaration wins.
    pub fn open(path: &Path, scope: Option<&str>, nets: &[&str]) -> Result<Self, TraceError> {
        let vcd_file =
            File::open(path).map_err(|e| TraceError::Io(format!("{}: {}", path.display(), e)))?;
        let mut bufrd = BufReader::with_capacity(65536, vcd_file);
        let mut vcd_parser = vcd_ng::Parser::new(&mut bufrd);
        let header = vcd_parser
            .parse_header()
            .map_err(|e| TraceError::Vcd(format!("{}: {}", path.display(), e)))?;
        drop(vcd_parser);
        let mut file = bufrd.into_inner();
        file.seek(SeekFrom::Start(0))?;

        let mut vars = Vec::new();
        match scope.filter(|s| !s.is_empty()) {
            Some(scope_path) => {
                let top = find_scope(&header.items[..], scope_path).ok_or_else(|| {
                    TraceError::Vcd(format!("scope '{}' not found in VCD header", scope_path))
                })?;
                clilog::info!("Using VCD scope: {}", scope_path);
                collect_vars(&top.children[..], false, &mut vars);
            }
            None => collect_vars(&header.items[..], true, &mut vars),
        }

        let mut bindings: HashMap<(u64, usize), Vec<usize>> = HashMap::new();
        for (net_idx, &net) in nets.iter().enumerate() {
            let (base, bit) = split_bit_select(net);
            let mut matches = vars
                .iter()
                .filter(|v| v.reference.as_str() == base)
                .filter_map(|v| bit_position(v, bit).map(|pos| (v.code.0, pos)));
            let Some(key) = matches.next() else {
                return Err(TraceError::UnknownSignal(net.to_string()));
            };
            if matches.next().is_some() {
                clilog::warn!(
                    TD_VCD_DUP_NET,
                    "Net '{}' is declared more than once in the VCD; using the first declaration",
                    net
                );
            }
            bindings.entry(key).or_default().push(net_idx);
        }

        Ok(VcdChanges {
            path: path.display().to_string(),
            file,
            bindings,
            nets: nets.iter().map(|&n| n.into()).collect(),
            ps_per_tick: ps_per_tick(header.timescale),
        })
    }

    /// Stream the value changes of the bound nets in file order, calling
    /// `f(time, net index, value)` for each. Returns the last timestamp.
    pub fn for_each<F, E>(self, mut f: F) -> Result<Time, E>
    where
        F: FnMut(Time, usize, LogicValue) -> Result<(), E>,
        E: From<TraceError>,
    {
        use vcd_ng::{FFValueChange, FastFlowToken};
        let VcdChanges {
            path,
            file,
            bindings,
            nets,
            ..
        } = self;
        let mut vcdflow = vcd_ng::FastFlow::new(file, 65536);
        let mut vcd_time: Time = 0;
        let mut num_unknown = 0usize;
        while let Some(tok) = vcdflow
            .next_token()
            .map_err(|e| TraceError::Vcd(format!("{}: {}", path, e)))?
        {
            match tok {
                FastFlowToken::Timestamp(t) => vcd_time = t,
                FastFlowToken::Value(FFValueChange { id, bits }) => {
                    for (pos, &b) in bits.iter().enumerate() {
                        let Some(idxs) = bindings.get(&(id.0, pos)) else {
                            continue;
                        };
                        let value = LogicValue::from_vcd_byte(b);
                        if !value.is_known() {
                            num_unknown += 1;
                            clilog::warn!(
                                TD_VCD_UNKNOWN,
                                "Net '{}' takes unknown value '{}' at {}",
                                nets[idxs[0]],
                                b as char,
                                vcd_time
                            );
                        }
                        for &i in idxs {
                            f(vcd_time, i, value)?;
                        }
                    }
                }
            }
        }
        if num_unknown > 0 {
            clilog::info!("{} unknown values on monitored nets", num_unknown);
        }
        Ok(vcd_time)
    }
}

/// Load the timelines of `nets` from a VCD file.
///
/// Every value change of every requested net is kept in memory. See
/// [`crate::extract::CycleStream`] for a bounded-memory alternative.
pub fn load_vcd(path: &Path, scope: Option<&str>, nets: &[&str]) -> Result<Waveform, TraceError> {
    let timer = clilog::stimer!("load_vcd");
    let changes = VcdChanges::open(path, scope, nets)?;
    let mut waveform = Waveform::new(changes.ps_per_tick);
    let mut timelines = vec![EventTimeline::new(); nets.len()];
    let last_time = changes.for_each(|time, i, value| {
        timelines[i].push(time, value).map_err(|e| match e {
            TraceError::MalformedTrace(msg) => {
                TraceError::MalformedTrace(format!("net '{}': {}", nets[i], msg))
            }
            other => other,
        })
    })?;

    for (net, timeline) in nets.iter().zip(timelines) {
        if timeline.is_empty() {
            clilog::warn!("Net '{}' has no value changes in the VCD", net);
        }
        waveform.insert(*net, timeline);
    }
    clilog::info!(
        "Loaded {} events on {} nets (last timestamp {}, {} ps/tick)",
        waveform.num_events(),
        nets.len(),
        last_time,
        waveform.ps_per_tick
    );
    clilog::finish!(timer);
    Ok(waveform)
}
