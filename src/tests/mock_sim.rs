//! An event-wheel simulator double.
//!
//! Implements [`SimulatorBackend`] well enough to drive the scheduler
//! end-to-end: timed callbacks mature in time order, value changes fire
//! as fresh delta cycles, and each timestep ends with a ReadWrite window
//! followed by a ReadOnly window, like a real simulator's callback
//! ordering.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::ffi::gpi_sim_hdl;
use crate::gpi::{CbHdl, EdgeKind, GpiCallback, ObjectKind, RawHdl, SetAction, SimulatorBackend};
use crate::types::LogicArray;
use crate::types::Range;

struct Registration {
    id: u64,
    cb: GpiCallback,
}

struct TimedReg {
    due: u64,
    id: u64,
    cb: GpiCallback,
}

struct ValueChangeReg {
    id: u64,
    sig: usize,
    edge: EdgeKind,
    cb: GpiCallback,
}

struct ObjectDef {
    name: String,
    kind: ObjectKind,
    width: usize,
    value: String,
    is_const: bool,
    children: Vec<(String, usize)>,
}

struct State {
    time: u64,
    precision: i8,
    next_cb: u64,
    next_hdl: usize,
    objects: HashMap<usize, ObjectDef>,
    root: usize,
    timed: Vec<TimedReg>,
    rw: Vec<Registration>,
    ro: Vec<Registration>,
    nextstep: Vec<Registration>,
    value_change: Vec<ValueChangeReg>,
    /// Callbacks due in the current delta cycle.
    ready: VecDeque<Registration>,
    /// Every applied write across all signals, oldest first.
    write_seq: Vec<(usize, SetAction, String)>,
    stopped: bool,
    sim_event_cb: Option<Box<dyn Fn(&str)>>,
}

impl State {
    fn next_cb_id(&mut self) -> u64 {
        let id = self.next_cb;
        self.next_cb += 1;
        id
    }

    fn add_object(&mut self, def: ObjectDef) -> usize {
        let hdl = self.next_hdl;
        self.next_hdl += 1;
        self.objects.insert(hdl, def);
        hdl
    }

    fn apply_write(&mut self, hdl: usize, action: SetAction, new: String) {
        self.write_seq.push((hdl, action, new.clone()));
        let obj = self.objects.get_mut(&hdl).expect("write to unknown handle");
        let old = std::mem::replace(&mut obj.value, new.clone());
        if old == new {
            return;
        }

        // value changes mature as a fresh delta cycle
        let rising = new == "1" && old != "1";
        let falling = new == "0" && old != "0";
        let mut fired = Vec::new();
        let mut keep = Vec::new();
        for reg in self.value_change.drain(..) {
            let matches = reg.sig == hdl
                && ((reg.edge.contains(EdgeKind::RISING) && rising)
                    || (reg.edge.contains(EdgeKind::FALLING) && falling)
                    || (reg.edge == EdgeKind::VALUE_CHANGE && !rising && !falling));
            if matches {
                fired.push(reg);
            } else {
                keep.push(reg);
            }
        }
        self.value_change = keep;
        fired.sort_by_key(|r| r.id);
        for reg in fired {
            self.ready.push_back(Registration { id: reg.id, cb: reg.cb });
        }
    }

    fn render_int(&self, hdl: usize, value: i64) -> String {
        let width = self.objects[&hdl].width;
        let range = Range::with_width(width);
        let rendered = if value < 0 {
            LogicArray::from_signed(value, range)
        } else {
            LogicArray::from_unsigned(value as u64, range)
        };
        rendered.expect("integer write out of range for signal").to_binstr()
    }
}

/// The mock simulator: install with `gpi::install_backend`, drive with
/// [`MockSim::run`].
pub struct MockSim {
    state: RefCell<State>,
}

impl MockSim {
    pub fn new() -> Rc<MockSim> {
        let mut state = State {
            time: 0,
            precision: -9,
            next_cb: 1,
            next_hdl: 1,
            objects: HashMap::new(),
            root: 0,
            timed: Vec::new(),
            rw: Vec::new(),
            ro: Vec::new(),
            nextstep: Vec::new(),
            value_change: Vec::new(),
            ready: VecDeque::new(),
            write_seq: Vec::new(),
            stopped: false,
            sim_event_cb: None,
        };
        let root = state.add_object(ObjectDef {
            name: "top".to_owned(),
            kind: ObjectKind::Module,
            width: 0,
            value: String::new(),
            is_const: false,
            children: Vec::new(),
        });
        state.root = root;
        Rc::new(MockSim { state: RefCell::new(state) })
    }

    fn add_signal(&self, name: &str, kind: ObjectKind, width: usize, init: &str, is_const: bool) -> RawHdl {
        let mut state = self.state.borrow_mut();
        let hdl = state.add_object(ObjectDef {
            name: name.to_owned(),
            kind,
            width,
            value: init.to_owned(),
            is_const,
            children: Vec::new(),
        });
        let root = state.root;
        state.objects.get_mut(&root).unwrap().children.push((name.to_owned(), hdl));
        gpi_sim_hdl(hdl)
    }

    /// Adds a scalar logic signal under the root module.
    pub fn add_logic(&self, name: &str, init: char) -> RawHdl {
        self.add_signal(name, ObjectKind::Logic, 1, &init.to_string(), false)
    }

    /// Adds a packed vector under the root module.
    pub fn add_logic_array(&self, name: &str, init: &str) -> RawHdl {
        self.add_signal(name, ObjectKind::LogicArray, init.len(), init, false)
    }

    /// Adds an immutable packed vector under the root module.
    pub fn add_const_logic_array(&self, name: &str, init: &str) -> RawHdl {
        self.add_signal(name, ObjectKind::LogicArray, init.len(), init, true)
    }

    /// Adds an unpacked array of packed vectors under the root module.
    pub fn add_array(&self, name: &str, elems: &[&str]) -> RawHdl {
        let parent = self.add_signal(name, ObjectKind::NetArray, elems.len(), "", false);
        let mut state = self.state.borrow_mut();
        for (index, init) in elems.iter().enumerate() {
            let child = state.add_object(ObjectDef {
                name: format!("{}[{}]", name, index),
                kind: ObjectKind::LogicArray,
                width: init.len(),
                value: (*init).to_owned(),
                is_const: false,
                children: Vec::new(),
            });
            state
                .objects
                .get_mut(&parent.0)
                .unwrap()
                .children
                .push((index.to_string(), child));
        }
        parent
    }

    /// The current binary-string value of a signal.
    pub fn value_of(&self, hdl: RawHdl) -> String {
        self.state.borrow().objects[&hdl.0].value.clone()
    }

    /// Every write applied to a signal, oldest first.
    pub fn write_log(&self, hdl: RawHdl) -> Vec<(SetAction, String)> {
        self.state
            .borrow()
            .write_seq
            .iter()
            .filter(|(h, _, _)| *h == hdl.0)
            .map(|(_, action, value)| (*action, value.clone()))
            .collect()
    }

    /// Every applied write across all signals, oldest first.
    pub fn writes_in_order(&self) -> Vec<(RawHdl, SetAction, String)> {
        self.state
            .borrow()
            .write_seq
            .iter()
            .map(|(h, action, value)| (gpi_sim_hdl(*h), *action, value.clone()))
            .collect()
    }

    /// The number of outstanding timed registrations.
    pub fn timed_count(&self) -> usize {
        self.state.borrow().timed.len()
    }

    /// The number of outstanding value-change registrations.
    pub fn value_change_count(&self) -> usize {
        self.state.borrow().value_change.len()
    }

    pub fn time(&self) -> u64 {
        self.state.borrow().time
    }

    pub fn stopped(&self) -> bool {
        self.state.borrow().stopped
    }

    /// Delivers an asynchronous simulator failure message.
    pub fn fire_sim_event(&self, msg: &str) {
        let cb = self.state.borrow_mut().sim_event_cb.take();
        if let Some(cb) = cb {
            cb(msg);
            self.state.borrow_mut().sim_event_cb = Some(cb);
        }
    }

    /// Runs the event wheel until no work remains or the simulator is
    /// stopped.
    pub fn run(&self) {
        self.run_until(u64::MAX);
    }

    /// Runs the event wheel, never advancing time beyond `max_time`.
    pub fn run_until(&self, max_time: u64) {
        loop {
            if self.state.borrow().stopped {
                return;
            }

            // current delta cycle first
            let ready = self.state.borrow_mut().ready.pop_front();
            if let Some(reg) = ready {
                (reg.cb)();
                continue;
            }

            // end of deltas: read-write window
            let rw = Self::pop_lowest(&mut self.state.borrow_mut().rw);
            if let Some(reg) = rw {
                (reg.cb)();
                continue;
            }

            // then the read-only window
            let ro = Self::pop_lowest(&mut self.state.borrow_mut().ro);
            if let Some(reg) = ro {
                (reg.cb)();
                continue;
            }

            // timestep exhausted: advance to the next timed event
            let advanced = {
                let mut state = self.state.borrow_mut();
                match state.timed.iter().map(|t| t.due).min() {
                    Some(due) if due <= max_time => {
                        state.time = due;
                        let mut nextstep: Vec<Registration> = state.nextstep.drain(..).collect();
                        nextstep.sort_by_key(|r| r.id);

                        let mut matured = Vec::new();
                        let mut keep = Vec::new();
                        for t in state.timed.drain(..) {
                            if t.due == due {
                                matured.push(t);
                            } else {
                                keep.push(t);
                            }
                        }
                        state.timed = keep;
                        matured.sort_by_key(|t| t.id);

                        for reg in nextstep {
                            state.ready.push_back(reg);
                        }
                        for t in matured {
                            state.ready.push_back(Registration { id: t.id, cb: t.cb });
                        }
                        true
                    }
                    _ => false,
                }
            };
            if !advanced {
                return;
            }
        }
    }

    fn pop_lowest(regs: &mut Vec<Registration>) -> Option<Registration> {
        let pos = regs
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| r.id)
            .map(|(pos, _)| pos)?;
        Some(regs.remove(pos))
    }
}

impl SimulatorBackend for MockSim {
    fn register_timed_callback(&self, steps: u64, cb: GpiCallback) -> Option<CbHdl> {
        let mut state = self.state.borrow_mut();
        let id = state.next_cb_id();
        let due = state.time + steps;
        state.timed.push(TimedReg { due, id, cb });
        Some(CbHdl::new(id))
    }

    fn register_readonly_callback(&self, cb: GpiCallback) -> Option<CbHdl> {
        let mut state = self.state.borrow_mut();
        let id = state.next_cb_id();
        state.ro.push(Registration { id, cb });
        Some(CbHdl::new(id))
    }

    fn register_rwsynch_callback(&self, cb: GpiCallback) -> Option<CbHdl> {
        let mut state = self.state.borrow_mut();
        let id = state.next_cb_id();
        state.rw.push(Registration { id, cb });
        Some(CbHdl::new(id))
    }

    fn register_nextstep_callback(&self, cb: GpiCallback) -> Option<CbHdl> {
        let mut state = self.state.borrow_mut();
        let id = state.next_cb_id();
        state.nextstep.push(Registration { id, cb });
        Some(CbHdl::new(id))
    }

    fn register_value_change_callback(
        &self,
        sig: RawHdl,
        edge: EdgeKind,
        cb: GpiCallback,
    ) -> Option<CbHdl> {
        let mut state = self.state.borrow_mut();
        if !state.objects.contains_key(&sig.0) {
            return None;
        }
        let id = state.next_cb_id();
        state.value_change.push(ValueChangeReg { id, sig: sig.0, edge, cb });
        Some(CbHdl::new(id))
    }

    fn deregister(&self, hdl: CbHdl) {
        let id = hdl.raw();
        let mut state = self.state.borrow_mut();
        state.timed.retain(|t| t.id != id);
        state.rw.retain(|r| r.id != id);
        state.ro.retain(|r| r.id != id);
        state.nextstep.retain(|r| r.id != id);
        state.value_change.retain(|r| r.id != id);
        state.ready.retain(|r| r.id != id);
    }

    fn set_sim_event_callback(&self, cb: Box<dyn Fn(&str)>) {
        self.state.borrow_mut().sim_event_cb = Some(cb);
    }

    fn stop_simulator(&self) {
        self.state.borrow_mut().stopped = true;
    }

    fn get_root_handle(&self, name: Option<&str>) -> Option<RawHdl> {
        let state = self.state.borrow();
        match name {
            Some(n) if n != state.objects[&state.root].name => None,
            _ => Some(gpi_sim_hdl(state.root)),
        }
    }

    fn get_handle_by_name(&self, parent: RawHdl, name: &str) -> Option<RawHdl> {
        let state = self.state.borrow();
        let parent = state.objects.get(&parent.0)?;
        parent
            .children
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, hdl)| gpi_sim_hdl(*hdl))
    }

    fn get_handle_by_index(&self, parent: RawHdl, index: i32) -> Option<RawHdl> {
        let state = self.state.borrow();
        let parent = state.objects.get(&parent.0)?;
        parent.children.get(index as usize).map(|(_, hdl)| gpi_sim_hdl(*hdl))
    }

    fn iterate(&self, parent: RawHdl) -> Vec<RawHdl> {
        let state = self.state.borrow();
        match state.objects.get(&parent.0) {
            Some(obj) => obj.children.iter().map(|(_, hdl)| gpi_sim_hdl(*hdl)).collect(),
            None => Vec::new(),
        }
    }

    fn get_name_string(&self, hdl: RawHdl) -> String {
        self.state.borrow().objects[&hdl.0].name.clone()
    }

    fn get_type_string(&self, hdl: RawHdl) -> String {
        format!("{:?}", self.state.borrow().objects[&hdl.0].kind)
    }

    fn get_type(&self, hdl: RawHdl) -> i32 {
        self.state.borrow().objects[&hdl.0].kind as i32
    }

    fn get_const(&self, hdl: RawHdl) -> bool {
        self.state.borrow().objects[&hdl.0].is_const
    }

    fn get_num_elems(&self, hdl: RawHdl) -> usize {
        self.state.borrow().objects[&hdl.0].width
    }

    fn get_definition_name(&self, hdl: RawHdl) -> String {
        self.state.borrow().objects[&hdl.0].name.clone()
    }

    fn get_signal_val_binstr(&self, hdl: RawHdl) -> String {
        self.state.borrow().objects[&hdl.0].value.clone()
    }

    fn set_signal_val_int(&self, hdl: RawHdl, action: SetAction, value: i64) {
        let rendered = self.state.borrow().render_int(hdl.0, value);
        self.state.borrow_mut().apply_write(hdl.0, action, rendered);
    }

    fn set_signal_val_binstr(&self, hdl: RawHdl, action: SetAction, value: &str) {
        self.state.borrow_mut().apply_write(hdl.0, action, value.to_owned());
    }

    fn get_sim_time(&self) -> u64 {
        self.state.borrow().time
    }

    fn get_sim_precision(&self) -> i8 {
        self.state.borrow().precision
    }

    fn get_simulator_product(&self) -> String {
        "cosim mock simulator".to_owned()
    }

    fn get_simulator_version(&self) -> String {
        "0.1".to_owned()
    }
}
