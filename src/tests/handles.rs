//! Handle discovery, typed downcasts, and value encoding.

use super::{bare_fixture, dut, fixture};
use crate::gpi::SetAction;
use crate::handle::HandleError;
use crate::triggers::Trigger;
use crate::types::{Logic, LogicArray, ResolveX, ValueError};
use crate::{start_soon, Error};

use super::kick;

#[test]
fn lookup_and_downcasts() {
    let fx = fixture();
    fx.sim.add_logic("clk", '0');
    fx.sim.add_logic_array("bus", "0000");
    let dut = dut();

    assert!(dut.logic("clk").is_ok());
    assert!(dut.logic_array("bus").is_ok());

    assert!(matches!(
        dut.logic("bus"),
        Err(Error::Handle(HandleError::Kind { .. }))
    ));
    assert!(matches!(
        dut.logic("nope"),
        Err(Error::Handle(HandleError::NotFound { .. }))
    ));

    let bus = dut.logic_array("bus").unwrap();
    assert_eq!(bus.path(), "top.bus");
    assert_eq!(bus.len().unwrap(), 4);
    drop(fx);
}

#[test]
fn discovery_enumerates_children() {
    let fx = fixture();
    fx.sim.add_logic("clk", '0');
    fx.sim.add_logic_array("bus", "0000");
    let children = dut().children().unwrap();
    assert_eq!(children.len(), 2);
    drop(fx);
}

// A rising edge on a vector-typed handle is a type error, caught at the
// downcast that would produce the scalar handle.
#[test]
fn edge_on_a_vector_handle_is_a_type_error() {
    let fx = fixture();
    fx.sim.add_logic_array("bus", "0000");

    let err = dut().logic("bus").unwrap_err();
    assert!(matches!(err, Error::Handle(HandleError::Kind { .. })));
    drop(fx);
}

#[test]
fn small_integers_write_as_integers() {
    let fx = fixture();
    let hdl = fx.sim.add_logic_array("sig", "0000");
    let sig = dut().logic_array("sig").unwrap();

    start_soon(async move {
        sig.set(3i64)?;
        Trigger::read_write().await?;
        sig.set(-1i64)?;
        Trigger::read_write().await?;
        Ok(())
    });
    kick();
    fx.sim.run_until(0);

    assert_eq!(
        fx.sim.write_log(hdl),
        vec![
            (SetAction::Deposit, "0011".to_owned()),
            (SetAction::Deposit, "1111".to_owned()),
        ]
    );
    drop(fx);
}

#[test]
fn wide_integers_write_as_binary_strings() {
    let fx = fixture();
    let hdl = fx.sim.add_logic_array("wide", &"0".repeat(40));
    let sig = dut().logic_array("wide").unwrap();

    start_soon(async move {
        sig.set(5i64)?;
        Trigger::read_write().await?;
        Ok(())
    });
    kick();
    fx.sim.run_until(0);

    let writes = fx.sim.write_log(hdl);
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1.len(), 40);
    assert!(writes[0].1.ends_with("101"));
    drop(fx);
}

#[test]
fn out_of_range_integers_are_rejected() {
    let fx = fixture();
    fx.sim.add_logic_array("sig", "0000");
    let sig = dut().logic_array("sig").unwrap();

    // the 4-bit vector range is [-8, 15]
    assert!(sig.set(15i64).is_ok());
    assert!(sig.set(-8i64).is_ok());
    assert_eq!(
        sig.set(16i64),
        Err(Error::Value(ValueError::Overflow { value: 16, width: 4 }))
    );
    assert_eq!(
        sig.set(-9i64),
        Err(Error::Value(ValueError::Overflow { value: -9, width: 4 }))
    );
    drop(fx);
}

#[test]
fn string_and_array_writes_are_length_checked() {
    let fx = fixture();
    fx.sim.add_logic_array("sig", "0000");
    let sig = dut().logic_array("sig").unwrap();

    assert!(sig.set("01XZ").is_ok());
    assert_eq!(
        sig.set("011"),
        Err(Error::Value(ValueError::LengthMismatch { expected: 4, got: 3 }))
    );

    let too_long = LogicArray::new("010101", None).unwrap();
    assert_eq!(
        sig.set(too_long),
        Err(Error::Value(ValueError::LengthMismatch { expected: 4, got: 6 }))
    );

    assert_eq!(
        sig.set(Logic::One),
        Err(Error::Value(ValueError::LengthMismatch { expected: 4, got: 1 }))
    );
    drop(fx);
}

#[test]
fn writes_to_constants_are_rejected() {
    let fx = fixture();
    fx.sim.add_const_logic_array("param", "0101");
    let param = dut().logic_array("param").unwrap();

    assert!(param.is_const().unwrap());
    assert_eq!(
        param.set(1i64),
        Err(Error::Handle(HandleError::Constant { path: "top.param".to_owned() }))
    );
    assert_eq!(
        param.set_immediate(1i64),
        Err(Error::Handle(HandleError::Constant { path: "top.param".to_owned() }))
    );
    assert!(fx.sim.writes_in_order().is_empty());
    drop(fx);
}

#[test]
fn values_parse_into_logic_types() {
    let fx = fixture();
    fx.sim.add_logic("flag", 'X');
    fx.sim.add_logic_array("bus", "1X01");

    let flag = dut().logic("flag").unwrap();
    assert_eq!(flag.value().unwrap(), Logic::X);

    let bus = dut().logic_array("bus").unwrap();
    let value = bus.value().unwrap();
    assert!(value.to_unsigned(ResolveX::ValueError).is_err());
    assert_eq!(value.to_unsigned(ResolveX::Zeros).unwrap(), 0b1001);
    drop(fx);
}

#[test]
fn unpacked_arrays_index_into_element_objects() {
    let fx = fixture();
    fx.sim.add_array("mem", &["0000", "1111"]);

    let mem = dut().array("mem").unwrap();
    assert_eq!(mem.len().unwrap(), 2);

    let elem = mem.index(1).unwrap().as_logic_array().unwrap();
    assert_eq!(elem.path(), "top.mem[1]");
    assert_eq!(elem.value().unwrap().to_binstr(), "1111");

    assert!(matches!(
        mem.index(5),
        Err(Error::Handle(HandleError::IndexOutOfRange { .. }))
    ));
    drop(fx);
}

#[test]
fn handles_are_interned_per_raw_handle() {
    let fx = bare_fixture();
    let raw = fx.sim.add_logic("clk", '0');

    let a = crate::handle::sim_object(raw, None).unwrap();
    let b = crate::handle::sim_object(raw, Some("elsewhere".to_owned())).unwrap();
    // the second path is ignored: the first wrapper wins
    assert_eq!(a.path(), b.path());
    assert_eq!(a.as_logic().unwrap().raw(), b.as_logic().unwrap().raw());
    drop(fx);
}
